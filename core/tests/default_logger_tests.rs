use groupcall::{prelude::*, runtime::drop_default_logger};

// Runs in its own process, since the default logger cannot be used after it was dropped.
#[test]
fn dropping_default_logger_flushes_once() {
    let logger = default_logger().new(o!("test" => "flush"));
    for i in 0..100 {
        info!(logger, "Record {} before shutdown", i);
    }
    drop(logger);
    drop_default_logger();
    drop_default_logger();
}
