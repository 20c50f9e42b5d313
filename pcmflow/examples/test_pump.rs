//! 流泵演示
//!
//! 使用模拟设备演示播放、采集与故障恢复
//!
//! 运行: cargo run --example test_pump

use std::io::{Cursor, Read, Write};

use pcmflow::audio::{AudioFormat, HwError, MockDevice, MockOp, SampleFormat};
use pcmflow::state::StreamConfig;
use pcmflow::stream::{AudioSink, AudioSource};
use pcmflow::utils::init_logging;

fn main() -> anyhow::Result<()> {
    init_logging();

    let format = AudioFormat::new(8000, 1, SampleFormat::I16);
    println!("=== 流泵演示 ===\n");

    // 1. pull 播放
    println!("1. pull 播放");
    println!("{}", "-".repeat(40));

    let device = MockDevice::new(16, 4);
    let sink = AudioSink::new(device.clone(), StreamConfig::manual())?;
    sink.set_format(format)?;
    sink.start(Cursor::new(vec![1u8; 96]))?;

    for round in 1..=4 {
        sink.tick();
        println!(
            "  tick {}: 状态 {}, 已播放 {} 字节, 可写 {} 字节",
            round,
            sink.state().name(),
            device.played().len(),
            sink.bytes_free()
        );
        device.consume(16);
    }
    sink.stop();
    println!("  停止后状态: {}", sink.state().name());
    println!();

    // 2. push 播放与故障恢复
    println!("2. push 播放与故障恢复");
    println!("{}", "-".repeat(40));

    let device = MockDevice::new(16, 4);
    let sink = AudioSink::new(device.clone(), StreamConfig::manual())?;
    sink.set_format(format)?;
    let mut writer = sink.start_push()?;

    device.fail_next(MockOp::Write, HwError::EPIPE);
    let written = writer.write(&[2u8; 16])?;
    println!(
        "  写入 {} 字节, prepare 次数 {}, 状态 {}",
        written,
        device.counters().prepares,
        sink.state().name()
    );

    device.fail_next(MockOp::Write, HwError::ESTRPIPE);
    let written = writer.write(&[3u8; 8])?;
    println!(
        "  挂起后写入 {} 字节, resume 次数 {}",
        written,
        device.counters().resumes
    );

    sink.suspend();
    println!("  suspend: {}", sink.state().name());
    sink.resume();
    println!("  resume: {}", sink.state().name());
    sink.stop();
    println!("  writer 仍连接: {}", writer.is_attached());
    println!();

    // 3. push 采集
    println!("3. push 采集");
    println!("{}", "-".repeat(40));

    let device = MockDevice::new(8, 2);
    let source = AudioSource::new(device.clone(), StreamConfig::manual())?;
    source.set_format(format)?;
    let mut reader = source.start_push()?;

    device.feed(&[10, 20, 30, 40, 50]);
    println!("  可读 {} 字节", source.bytes_ready());

    let mut buf = [0u8; 8];
    let n = reader.read(&mut buf)?;
    println!("  读取 {} 字节: {:?}", n, &buf[..n]);
    println!("  已处理 {} us", source.processed_usecs());

    source.stop();
    println!("  停止后读取: {} 字节", reader.read(&mut buf)?);
    println!();

    println!("=== 演示完成 ===");
    Ok(())
}
