use nbd_store::proto;
use nbd_store::{BlockPlugin, CallbackAdapter, Flags, Plugin, PluginError};

fn ready_plugin(params: &[(&str, &str)]) -> BlockPlugin {
    let plugin = BlockPlugin::new();
    plugin.load();
    for (key, value) in params {
        plugin.config(key, value).unwrap();
    }
    plugin.config_complete().unwrap();
    plugin.get_ready().unwrap();
    plugin
}

#[test]
fn write_two_halves_and_read_back() {
    let plugin = ready_plugin(&[("size", "1024")]);
    assert!(plugin.pre_connect(false).unwrap());
    let handle = plugin.open(false).unwrap();
    assert_eq!(plugin.get_size(handle).unwrap(), 1024);

    plugin.pwrite(handle, &[0xaa; 512], 0, Flags::NONE).unwrap();
    plugin.pwrite(handle, &[0xbb; 512], 512, Flags::FORCE_DURABLE).unwrap();

    let mut buf = vec![0_u8; 1024];
    plugin.pread(handle, &mut buf, 0, Flags::NONE).unwrap();
    assert!(buf[..512].iter().all(|b| *b == 0xaa));
    assert!(buf[512..].iter().all(|b| *b == 0xbb));

    plugin.flush(handle, Flags::NONE).unwrap();
    plugin.close(handle);
    plugin.unload();
    assert_eq!(plugin.state_name(), "unloaded");
}

#[test]
fn bad_size_stops_configuration() {
    let adapter = CallbackAdapter::new(BlockPlugin::new());
    adapter.load();
    assert_eq!(adapter.config("size", "not-a-number"), -1);
    assert_eq!(adapter.plugin().state_name(), "configuring");

    let plugin = BlockPlugin::new();
    plugin.load();
    let err = plugin.config("size", "not-a-number").unwrap_err();
    assert!(matches!(err, PluginError::InvalidConfig { ref key, .. } if key == "size"));
    assert_eq!(err.errno(), proto::NBD_EINVAL);
}

#[test]
fn out_of_range_leaves_volume_untouched() {
    let plugin = ready_plugin(&[("size", "1K")]);
    let handle = plugin.open(false).unwrap();
    plugin.pwrite(handle, &[0x11; 1024], 0, Flags::NONE).unwrap();

    let err = plugin.pwrite(handle, &[0x22; 8], 1020, Flags::NONE).unwrap_err();
    assert_eq!(err.errno(), proto::NBD_ENOSPC);
    let err = plugin.zero(handle, 8, 1020, Flags::MAY_TRIM).unwrap_err();
    assert_eq!(err.errno(), proto::NBD_ENOSPC);
    let err = plugin.trim(handle, 8, u64::MAX - 2, Flags::NONE).unwrap_err();
    assert_eq!(err.errno(), proto::NBD_EINVAL);

    let mut buf = vec![0_u8; 1024];
    plugin.pread(handle, &mut buf, 0, Flags::NONE).unwrap();
    assert!(buf.iter().all(|b| *b == 0x11));
}

#[test]
fn zero_and_trim_read_back_as_zeros() {
    let plugin = ready_plugin(&[("size", "8K")]);
    let handle = plugin.open(false).unwrap();
    plugin.pwrite(handle, &[0xff; 8192], 0, Flags::NONE).unwrap();

    plugin.zero(handle, 1000, 100, Flags::NONE).unwrap();
    plugin.trim(handle, 4096, 4096, Flags::FORCE_DURABLE).unwrap();

    let mut buf = vec![0_u8; 8192];
    plugin.pread(handle, &mut buf, 0, Flags::NONE).unwrap();
    assert!(buf[..100].iter().all(|b| *b == 0xff));
    assert!(buf[100..1100].iter().all(|b| *b == 0));
    assert!(buf[1100..4096].iter().all(|b| *b == 0xff));
    assert!(buf[4096..].iter().all(|b| *b == 0));

    let stats = plugin.export().unwrap().stats();
    assert_eq!(stats.bytes_zeroed, 1000);
    assert_eq!(stats.bytes_trimmed, 4096);
}

#[test]
fn readonly_connection_is_refused_mutations() {
    let plugin = ready_plugin(&[("size", "4K")]);
    let handle = plugin.open(true).unwrap();
    assert!(!plugin.can_write(handle).unwrap());
    assert!(!plugin.can_trim(handle).unwrap());
    assert!(!plugin.can_zero(handle).unwrap());

    let err = plugin.pwrite(handle, &[1; 16], 0, Flags::NONE).unwrap_err();
    assert_eq!(err.errno(), proto::NBD_EPERM);
    plugin.flush(handle, Flags::NONE).unwrap();

    let mut buf = [0xee_u8; 16];
    plugin.pread(handle, &mut buf, 0, Flags::NONE).unwrap();
    assert_eq!(buf, [0; 16]);
}

#[test]
fn connections_share_one_volume() {
    let plugin = ready_plugin(&[("size", "4K")]);
    let writer = plugin.open(false).unwrap();
    let reader = plugin.open(true).unwrap();
    assert!(plugin.can_multi_conn(writer).unwrap());

    plugin.pwrite(writer, b"shared", 10, Flags::NONE).unwrap();
    plugin.flush(writer, Flags::NONE).unwrap();
    let mut buf = [0_u8; 6];
    plugin.pread(reader, &mut buf, 10, Flags::NONE).unwrap();
    assert_eq!(&buf, b"shared");

    plugin.close(writer);
    assert!(matches!(
        plugin.pread(writer, &mut buf, 0, Flags::NONE),
        Err(PluginError::StaleHandle(_))
    ));
    plugin.pread(reader, &mut buf, 10, Flags::NONE).unwrap();
}

#[test]
fn disabled_features_are_not_advertised() {
    let plugin = ready_plugin(&[("size", "4K"), ("trim", "off"), ("flush", "no")]);
    let handle = plugin.open(false).unwrap();
    assert!(!plugin.can_trim(handle).unwrap());
    assert!(!plugin.can_flush(handle).unwrap());
    assert!(plugin.can_zero(handle).unwrap());

    let err = plugin.trim(handle, 16, 0, Flags::NONE).unwrap_err();
    assert_eq!(err.errno(), proto::NBD_ENOTSUP);
}

#[test]
fn calls_out_of_order_are_rejected() {
    let plugin = BlockPlugin::new();
    assert!(matches!(
        plugin.config("size", "1K"),
        Err(PluginError::InvalidState { state: "unloaded", .. })
    ));
    plugin.load();
    assert!(matches!(plugin.pre_connect(false), Err(PluginError::InvalidState { .. })));

    let plugin = ready_plugin(&[("size", "1K")]);
    assert!(matches!(plugin.get_ready(), Err(PluginError::InvalidState { state: "ready", .. })));
    plugin.unload();
    assert!(matches!(plugin.open(false), Err(PluginError::InvalidState { .. })));
}
