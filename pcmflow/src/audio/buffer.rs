//! 采集环形缓冲区模块
//!
//! 在硬件就绪通知与应用读取之间缓存 PCM 字节
//!
//! # 特性
//!
//! - 容量为 N 的缓冲区最多保存 N-1 字节，`已用 + 空闲 == N-1` 始终成立
//! - 读取端按连续块暴露数据，跨越存储末尾时需要两次读取
//! - 非线程安全，由泵的互斥锁串行化访问
//!
//! # 使用示例
//!
//! ```
//! use pcmflow::audio::buffer::RingBuffer;
//!
//! let mut ring = RingBuffer::new(8);
//! ring.write(&[1, 2, 3]);
//!
//! assert_eq!(ring.available_data(), &[1, 2, 3]);
//! ring.read_bytes(2);
//! assert_eq!(ring.bytes_of_data_in_buffer(), 1);
//! assert_eq!(ring.free_bytes(), 6);
//! ```

use ringbuf::{
    traits::{Consumer, Observer, Producer},
    HeapRb,
};

/// 字节环形缓冲区
///
/// 封装 ringbuf 的堆分配缓冲区，保留一个哨兵字节的容量语义
pub struct RingBuffer {
    /// 底层存储（容量 <= 1 时为空）
    rb: Option<HeapRb<u8>>,
    /// 名义容量 N
    size: usize,
}

impl RingBuffer {
    /// 创建名义容量为 `size` 的缓冲区
    ///
    /// # Arguments
    ///
    /// * `size` - 名义容量（字节），实际可用 `size - 1`
    pub fn new(size: usize) -> Self {
        let rb = (size > 1).then(|| HeapRb::<u8>::new(size - 1));
        Self { rb, size }
    }

    /// 重新分配缓冲区，丢弃现有数据
    pub fn resize(&mut self, size: usize) {
        if size != self.size {
            *self = Self::new(size);
        } else {
            self.clear();
        }
    }

    /// 清空缓冲区
    pub fn clear(&mut self) {
        if let Some(rb) = self.rb.as_mut() {
            let _ = rb.clear();
        }
    }

    /// 获取名义容量
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// 写入数据
    ///
    /// 调用方需保证 `data.len() <= free_bytes()`，超出部分不会写入
    ///
    /// # Returns
    ///
    /// 返回实际写入的字节数
    pub fn write(&mut self, data: &[u8]) -> usize {
        debug_assert!(
            data.len() <= self.free_bytes(),
            "ring buffer overflow: {} > {}",
            data.len(),
            self.free_bytes()
        );
        match self.rb.as_mut() {
            Some(rb) => rb.push_slice(data),
            None => 0,
        }
    }

    /// 获取当前可连续读取的数据块
    ///
    /// 数据跨越存储末尾时只返回第一段
    pub fn available_data(&self) -> &[u8] {
        match self.rb.as_ref() {
            Some(rb) => rb.as_slices().0,
            None => &[],
        }
    }

    /// 当前连续数据块的长度
    pub fn available_data_block_size(&self) -> usize {
        self.available_data().len()
    }

    /// 消费 `count` 字节
    pub fn read_bytes(&mut self, count: usize) {
        if let Some(rb) = self.rb.as_mut() {
            let skipped = rb.skip(count);
            debug_assert_eq!(skipped, count, "read past end of ring buffer");
        }
    }

    /// 将数据复制到 `out` 并消费
    ///
    /// # Returns
    ///
    /// 返回实际读取的字节数
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        match self.rb.as_mut() {
            Some(rb) => rb.pop_slice(out),
            None => 0,
        }
    }

    /// 已缓存的字节数
    pub fn bytes_of_data_in_buffer(&self) -> usize {
        self.rb.as_ref().map_or(0, |rb| rb.occupied_len())
    }

    /// 可写入的字节数
    pub fn free_bytes(&self) -> usize {
        self.rb.as_ref().map_or(0, |rb| rb.vacant_len())
    }

    /// 检查缓冲区是否为空
    pub fn is_empty(&self) -> bool {
        self.bytes_of_data_in_buffer() == 0
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(0)
    }
}
