#[cfg(test)]
mod tests {
    use super::super::logging::{init_logging, try_init_logging};

    #[test]
    fn test_logging_initialization() {
        // Only one subscriber per process; the second attempt must fail quietly
        init_logging();
        assert!(try_init_logging().is_err());
        init_logging();
    }
}
