//! Real sockets: registry daemon, lease keepers and device servers on
//! ephemeral ports.

use std::sync::Arc;
use std::time::Duration;

use nightwatch::adapters::sim::{SimDome, SimMount};
use nightwatch::clock::SystemClock;
use nightwatch::devices::proxy::ProxyConfig;
use nightwatch::devices::{
    DeviceBinding, DeviceCommand, DeviceKind, DeviceProxy, DeviceReply, DeviceServer, DomeCommand,
    Mount, MountCommand, TcpDeviceTransport,
};
use nightwatch::error::Error;
use nightwatch::registry::{
    Directory, Metadata, Registry, RegistryClient, RegistryServer, ServiceAddress,
};

const TIMEOUT: Duration = Duration::from_secs(2);

fn daemon() -> (RegistryServer, Arc<RegistryClient>) {
    let server = RegistryServer::start(
        "127.0.0.1:0",
        Arc::new(Registry::new(Arc::new(SystemClock))),
        Duration::from_secs(1),
    )
    .unwrap();
    let client = Arc::new(RegistryClient::new(
        "127.0.0.1",
        server.local_addr().port(),
        TIMEOUT,
    ));
    (server, client)
}

fn proxy(directory: Arc<dyn Directory>) -> DeviceProxy {
    DeviceProxy::new(
        directory,
        Arc::new(TcpDeviceTransport),
        &ProxyConfig {
            resolve_timeout_ms: 100,
            backoff_initial_ms: 10,
            backoff_max_ms: 20,
            call_timeout_ms: 2_000,
        },
    )
}

#[test]
fn registry_round_trip_over_tcp() {
    let (mut server, client) = daemon();
    client.ping().unwrap();

    let mut meta = Metadata::new();
    meta.insert("kind".into(), "camera".into());
    client
        .register("cam0", ServiceAddress::new("10.0.0.5", 7001), meta.clone(), 60)
        .unwrap();

    let record = client.lookup("cam0").unwrap().unwrap();
    assert_eq!(record.address, ServiceAddress::new("10.0.0.5", 7001));
    assert_eq!(record.metadata, meta);
    assert_eq!(client.list().unwrap().len(), 1);

    client.renew("cam0", 60).unwrap();
    client.deregister("cam0").unwrap();
    assert_eq!(client.lookup("cam0").unwrap(), None);
    assert!(client.renew("cam0", 60).is_err());

    server.shutdown();
}

#[test]
fn device_server_registers_and_serves() {
    let (mut server, client) = daemon();
    let mount_server = DeviceServer::start(
        "huntsman.mount",
        Box::new(SimMount::new()),
        "127.0.0.1:0",
        "127.0.0.1",
        client.clone(),
        30,
    )
    .unwrap();

    let record = server.registry().lookup("huntsman.mount").unwrap();
    assert_eq!(record.address.port, mount_server.local_addr().port());
    assert_eq!(record.metadata.get("kind").map(String::as_str), Some("mount"));

    let proxy = proxy(client.clone());
    let binding = DeviceBinding::new("mount", "huntsman.mount", DeviceKind::Mount);
    let mount = Mount::new(&proxy, &binding, TIMEOUT).unwrap();

    // A parked mount refuses to slew; the fault comes back as a device error.
    let err = mount.slew_to(10.0, -30.0).unwrap_err();
    assert!(matches!(err, Error::Device(_)));

    mount.send(MountCommand::Unpark).unwrap();
    mount.slew_to(10.0, -30.0).unwrap();

    mount_server.shutdown();
    assert!(server.registry().lookup("huntsman.mount").is_none());
    assert!(matches!(
        proxy.invoke("huntsman.mount", &DeviceCommand::Mount(MountCommand::Park), TIMEOUT),
        Err(Error::ServiceUnavailable { .. })
    ));
    server.shutdown();
}

#[test]
fn static_address_skips_the_registry() {
    let (mut server, client) = daemon();
    let dome_server = DeviceServer::start(
        "huntsman.dome",
        Box::new(SimDome::new()),
        "127.0.0.1:0",
        "127.0.0.1",
        client,
        30,
    )
    .unwrap();

    // The proxy's directory knows nothing.
    let empty: Arc<dyn Directory> = Arc::new(Registry::new(Arc::new(SystemClock)));
    let proxy = proxy(empty);
    let mut binding = DeviceBinding::new("dome", "huntsman.dome", DeviceKind::Dome);
    binding.address = Some(ServiceAddress::new(
        "127.0.0.1",
        dome_server.local_addr().port(),
    ));

    let reply = proxy
        .invoke_binding(&binding, &DeviceCommand::Dome(DomeCommand::Open), TIMEOUT)
        .unwrap();
    assert_eq!(reply, DeviceReply::Done);

    dome_server.shutdown();
    server.shutdown();
}
