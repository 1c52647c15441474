use briny_conv::telemetry::{init_tracing, InitError};

#[test]
fn test_foreign_subscriber_is_reported_on_every_call() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .try_init()
        .unwrap();

    assert!(matches!(init_tracing(), Err(InitError::Install(_))));
    assert!(matches!(init_tracing(), Err(InitError::Install(_))));
}
