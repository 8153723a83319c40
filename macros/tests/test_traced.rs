#[cfg(test)]
mod tests {
    use qnet_macros::test_traced;
    use tracing::{debug, error, info, warn};

    #[test_traced("INFO")]
    fn test_info_level() {
        info!("This is an info log");
        debug!("This is a debug log (won't be shown)");
        assert_eq!(2 + 2, 4);
    }

    #[test_traced]
    fn test_default_level() {
        debug!("This is a debug log");
        assert_eq!(3 * 3, 9);
    }

    #[test_traced("warn")]
    fn test_lowercase_level() {
        warn!("Levels are case-insensitive");
        assert_eq!(4 - 1, 3);
    }

    #[test_traced("ERROR")]
    #[should_panic(expected = "inner panic")]
    fn test_should_panic_is_preserved() {
        error!("This is an error log");
        panic!("inner panic");
    }
}
