//! End-to-end scenarios over a temp WireGuard root, an in-memory store
//! and the no-op apply driver.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use npwg_conf::{parse, ConfFile};
use npwg_keys::KeyPair;
use npwg_manager::{
    ApplyDriver, CreatePeerRequest, DeleteMode, ErrorKind, PeerManager, Synchronizer,
    UpdatePeerRequest, WgSettings,
};
use npwg_store::{
    IpPool, PeerStatus, PoolStatus, Store, User, UserRole, EXTERNAL_MANAGED_KEY,
};

struct Harness {
    _dir: tempfile::TempDir,
    store: Store,
    manager: PeerManager,
    synchronizer: Synchronizer,
    admin: User,
    pool: IpPool,
    settings: WgSettings,
    cancel: CancellationToken,
}

fn wg_settings(root: &Path) -> WgSettings {
    WgSettings {
        root_dir: root.to_path_buf(),
        interface: "wg0".to_string(),
        user_dir: root.join("clients"),
        endpoint: "vpn.example.com:51820".to_string(),
        dns: "1.1.1.1".to_string(),
        default_allowed_ips: String::new(),
        server_ip: String::new(),
    }
}

fn setup() -> Harness {
    setup_with_initial(|server_key| {
        format!(
            "[Interface]\nPrivateKey = {}\nAddress = 100.100.100.1/24\nListenPort = 51820\n",
            server_key
        )
    })
}

fn setup_with_initial(initial: impl Fn(&str) -> String) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = wg_settings(dir.path());

    let server_key = KeyPair::generate().expect("server keypair");
    std::fs::write(
        settings.conf_path(),
        initial(&server_key.private_key().to_base64()),
    )
    .expect("seed config");

    let store = Store::open_in_memory().expect("store");
    let admin = User::new("admin", "admin@example.com", "pw", UserRole::Admin);
    store.create_user(&admin).expect("admin");
    let pool = IpPool::new("P1", "100.100.100.0/24");
    store.create_pool(&pool).expect("pool");

    let conf = Arc::new(ConfFile::new(settings.conf_path()));
    let manager = PeerManager::new(store.clone(), conf, settings.clone(), ApplyDriver::Noop);
    let synchronizer = Synchronizer::new(store.clone(), settings.clone());

    Harness {
        _dir: dir,
        store,
        manager,
        synchronizer,
        admin,
        pool,
        settings,
        cancel: CancellationToken::new(),
    }
}

fn create_request(h: &Harness, device: &str) -> CreatePeerRequest {
    CreatePeerRequest {
        user_id: h.admin.id.clone(),
        device_name: device.to_string(),
        ..Default::default()
    }
}

fn conf_text(h: &Harness) -> String {
    std::fs::read_to_string(h.settings.conf_path()).expect("read config")
}

#[tokio::test]
async fn s1_auto_allocate_on_create() {
    let h = setup();
    let peer = h
        .manager
        .create_peer(create_request(&h, "laptop"), &h.cancel)
        .await
        .expect("create");

    // .2 is the first host after the .1 server tunnel address.
    assert_eq!(peer.client_ip, "100.100.100.2/32");
    assert_eq!(peer.status, PeerStatus::Active);

    let alloc = h
        .store
        .allocation_by_peer(&peer.id)
        .expect("query")
        .expect("allocation row");
    assert_eq!(alloc.ip_address, "100.100.100.2");
    assert_eq!(alloc.ip_pool_id, h.pool.id);

    let doc = parse(&conf_text(&h));
    let managed: Vec<_> = doc.peers.iter().filter(|p| p.is_managed).collect();
    assert_eq!(managed.len(), 1);
    assert_eq!(managed[0].allowed_ips, "100.100.100.2/32");
    assert_eq!(managed[0].public_key, peer.client_public_key);
}

#[tokio::test]
async fn s2_preferred_ip_collision() {
    let h = setup();
    h.manager
        .create_peer(create_request(&h, "laptop"), &h.cancel)
        .await
        .expect("first");

    let mut req = create_request(&h, "phone");
    req.client_ip = Some("100.100.100.2".to_string());
    let err = h
        .manager
        .create_peer(req, &h.cancel)
        .await
        .expect_err("collision");
    assert_eq!(err.kind(), ErrorKind::IpAlreadyInUse);

    let (_, total) = h
        .manager
        .list_peers(&Default::default(), 0, 0)
        .expect("list");
    assert_eq!(total, 1, "no rows may be written on a failed create");
}

#[tokio::test]
async fn s3_reserved_addresses_are_excluded() {
    let h = setup();
    for (ip, kind) in [
        ("100.100.100.0", ErrorKind::IpIsNetworkAddress),
        ("100.100.100.255", ErrorKind::IpIsBroadcastAddress),
        ("100.100.100.1", ErrorKind::IpIsServerIp),
    ] {
        let mut req = create_request(&h, "device");
        req.client_ip = Some(ip.to_string());
        let err = h
            .manager
            .create_peer(req, &h.cancel)
            .await
            .expect_err("reserved");
        assert_eq!(err.kind(), kind, "for {ip}");
    }
}

#[tokio::test]
async fn s4_roundtrip_preserves_handwritten_peer() {
    let h = setup_with_initial(|server_key| {
        format!(
            "[Interface]\n\
             PrivateKey = {server_key}\n\
             Address = 100.100.100.1/24\n\
             ListenPort = 51820\n\
             \n\
             # office printer\n\
             [Peer]\n\
             PublicKey = HANDWRITTEN\n\
             AllowedIPs = 100.100.100.200/32\n"
        )
    });

    h.manager
        .create_peer(create_request(&h, "laptop"), &h.cancel)
        .await
        .expect("first");
    h.manager
        .create_peer(create_request(&h, "phone"), &h.cancel)
        .await
        .expect("second");

    let doc = parse(&conf_text(&h));
    let hand = doc
        .peer_by_public_key("HANDWRITTEN")
        .expect("hand-written peer survives");
    assert!(!hand.is_managed);
    assert_eq!(hand.comment, "# office printer");
    assert_eq!(hand.allowed_ips, "100.100.100.200/32");

    let managed: Vec<_> = doc.peers.iter().filter(|p| p.is_managed).collect();
    assert_eq!(managed.len(), 2);

    // Sorted ascending by address inside the managed block.
    let text = conf_text(&h);
    let first = text.find("100.100.100.2/32").expect("first ip");
    let second = text.find("100.100.100.3/32").expect("second ip");
    assert!(first < second);

    // Hand-written block sits above the sentinels.
    let begin = text.find("# NexusPointWG BEGIN").expect("sentinel");
    let hand_pos = text.find("HANDWRITTEN").expect("hand peer");
    assert!(hand_pos < begin);
}

#[tokio::test]
async fn s5_adoption_of_external_peer() {
    let h = setup();
    h.manager
        .create_peer(create_request(&h, "laptop"), &h.cancel)
        .await
        .expect("managed peer");

    let mut text = conf_text(&h);
    text.push_str("\n# spare router\n[Peer]\nPublicKey = EXTKEY\nAllowedIPs = 100.100.100.50/32\n");
    std::fs::write(h.settings.conf_path(), text).expect("hand edit");

    let report = h.synchronizer.sync(&h.cancel).await.expect("sync");
    assert_eq!(report.adopted, 1);
    assert_eq!(report.failed, 0);

    let adopted = h
        .store
        .peer_by_public_key("EXTKEY")
        .expect("query")
        .expect("adopted row");
    assert_eq!(adopted.client_private_key, EXTERNAL_MANAGED_KEY);
    assert_eq!(adopted.user_id, h.admin.id);
    assert!(adopted.device_name.starts_with("[External] "));
    assert_eq!(adopted.client_ip, "100.100.100.50/32");
    // The existing pool covers the address, so no auto pool appears.
    assert_eq!(adopted.ip_pool_id, h.pool.id);

    let alloc = h
        .store
        .allocation_by_peer(&adopted.id)
        .expect("query")
        .expect("allocation");
    assert_eq!(alloc.ip_address, "100.100.100.50");
}

#[tokio::test]
async fn s5b_adoption_creates_auto_pool_when_none_covers() {
    let h = setup();
    let mut text = conf_text(&h);
    text.push_str("\n[Peer]\nPublicKey = FARKEY\nAllowedIPs = 10.77.3.9/32\n");
    std::fs::write(h.settings.conf_path(), text).expect("hand edit");

    let report = h.synchronizer.sync(&h.cancel).await.expect("sync");
    assert_eq!(report.adopted, 1);

    let pool = h.store.pool_by_name("auto-10.77.3.0/24").expect("auto pool");
    assert_eq!(pool.cidr, "10.77.3.0/24");
    assert_eq!(pool.status, PoolStatus::Active);

    let adopted = h
        .store
        .peer_by_public_key("FARKEY")
        .expect("query")
        .expect("row");
    assert_eq!(adopted.ip_pool_id, pool.id);
}

#[tokio::test]
async fn s5c_adoption_reenables_matching_disabled_pool() {
    let h = setup();
    let mut dormant = IpPool::new("dormant", "10.88.1.0/24");
    dormant.status = PoolStatus::Disabled;
    h.store.create_pool(&dormant).expect("pool");

    let mut text = conf_text(&h);
    text.push_str("\n[Peer]\nPublicKey = DORMKEY\nAllowedIPs = 10.88.1.5/32\n");
    std::fs::write(h.settings.conf_path(), text).expect("hand edit");

    h.synchronizer.sync(&h.cancel).await.expect("sync");

    let pool = h.store.pool_by_id(&dormant.id).expect("reload");
    assert_eq!(pool.status, PoolStatus::Active, "re-enabled, not duplicated");
    assert!(matches!(
        h.store.pool_by_name("auto-10.88.1.0/24"),
        Err(npwg_store::StoreError::PoolNotFound(_))
    ));
}

#[tokio::test]
async fn s6_retirement_of_removed_peer() {
    let h = setup();
    let peer = h
        .manager
        .create_peer(create_request(&h, "laptop"), &h.cancel)
        .await
        .expect("create");

    // A human deletes the whole managed block.
    let text = conf_text(&h);
    let begin = text.find("# NexusPointWG BEGIN").expect("sentinel");
    let end = text.find("# NexusPointWG END").expect("sentinel") + "# NexusPointWG END".len();
    let edited = format!("{}{}", &text[..begin], &text[end..]);
    std::fs::write(h.settings.conf_path(), &edited).expect("hand edit");

    let report = h.synchronizer.sync(&h.cancel).await.expect("sync");
    assert_eq!(report.retired, 1);

    let reloaded = h.store.peer_by_id(&peer.id).expect("reload");
    assert_eq!(reloaded.status, PeerStatus::Disabled);

    // The synchronizer never writes the file.
    assert_eq!(conf_text(&h), edited);
}

#[tokio::test]
async fn sync_reactivates_peer_present_in_file() {
    let h = setup();
    let peer = h
        .manager
        .create_peer(create_request(&h, "laptop"), &h.cancel)
        .await
        .expect("create");

    let mut disabled = h.store.peer_by_id(&peer.id).expect("reload");
    disabled.status = PeerStatus::Disabled;
    h.store.update_peer(&disabled).expect("disable");

    let report = h.synchronizer.sync(&h.cancel).await.expect("sync");
    assert_eq!(report.reactivated, 1);
    assert_eq!(
        h.store.peer_by_id(&peer.id).expect("reload").status,
        PeerStatus::Active
    );
}

#[tokio::test]
async fn update_moves_address_and_rewrites_file() {
    let h = setup();
    let peer = h
        .manager
        .create_peer(create_request(&h, "laptop"), &h.cancel)
        .await
        .expect("create");

    let updated = h
        .manager
        .update_peer(
            UpdatePeerRequest {
                peer_id: peer.id.clone(),
                client_ip: Some("100.100.100.30".to_string()),
                ..Default::default()
            },
            &h.cancel,
        )
        .await
        .expect("update");
    assert_eq!(updated.client_ip, "100.100.100.30/32");

    let alloc = h
        .store
        .allocation_by_peer(&peer.id)
        .expect("query")
        .expect("row");
    assert_eq!(alloc.ip_address, "100.100.100.30");

    let doc = parse(&conf_text(&h));
    let managed: Vec<_> = doc.peers.iter().filter(|p| p.is_managed).collect();
    assert_eq!(managed.len(), 1);
    assert_eq!(managed[0].allowed_ips, "100.100.100.30/32");

    // The old address is free again.
    let mut req = create_request(&h, "phone");
    req.client_ip = Some("100.100.100.2".to_string());
    h.manager.create_peer(req, &h.cancel).await.expect("reuse");
}

#[tokio::test]
async fn disabling_peer_removes_it_from_file() {
    let h = setup();
    let peer = h
        .manager
        .create_peer(create_request(&h, "laptop"), &h.cancel)
        .await
        .expect("create");

    h.manager
        .update_peer(
            UpdatePeerRequest {
                peer_id: peer.id.clone(),
                status: Some(PeerStatus::Disabled),
                ..Default::default()
            },
            &h.cancel,
        )
        .await
        .expect("disable");

    let doc = parse(&conf_text(&h));
    assert!(doc.peers.iter().all(|p| !p.is_managed));

    // Reversible: re-enabling puts it back.
    h.manager
        .update_peer(
            UpdatePeerRequest {
                peer_id: peer.id.clone(),
                status: Some(PeerStatus::Active),
                ..Default::default()
            },
            &h.cancel,
        )
        .await
        .expect("enable");
    let doc = parse(&conf_text(&h));
    assert_eq!(doc.peers.iter().filter(|p| p.is_managed).count(), 1);
}

#[tokio::test]
async fn delete_peer_soft_and_hard() {
    let h = setup();
    let soft = h
        .manager
        .create_peer(create_request(&h, "laptop"), &h.cancel)
        .await
        .expect("create");
    let hard = h
        .manager
        .create_peer(create_request(&h, "phone"), &h.cancel)
        .await
        .expect("create");

    h.manager
        .delete_peer(&soft.id, DeleteMode::Soft, &h.cancel)
        .await
        .expect("soft delete");
    let row = h
        .store
        .allocation_by_peer(&soft.id)
        .expect("query")
        .expect("released row kept");
    assert_eq!(row.status, npwg_store::AllocationStatus::Released);

    h.manager
        .delete_peer(&hard.id, DeleteMode::Hard, &h.cancel)
        .await
        .expect("hard delete");
    assert!(h.store.allocation_by_peer(&hard.id).expect("query").is_none());

    let doc = parse(&conf_text(&h));
    assert_eq!(doc.peers.iter().filter(|p| p.is_managed).count(), 0);

    // Idempotent.
    h.manager
        .delete_peer(&soft.id, DeleteMode::Soft, &h.cancel)
        .await
        .expect("again");
}

#[tokio::test]
async fn client_artifacts_are_written_and_removed() {
    let h = setup();
    let peer = h
        .manager
        .create_peer(create_request(&h, "laptop"), &h.cancel)
        .await
        .expect("create");

    let flat = h.settings.user_dir.join(format!("{}.conf", peer.id));
    assert!(flat.exists());
    let text = h.manager.client_config_text(&peer.id).expect("client config");
    assert!(text.contains("Address = 100.100.100.2/32"));
    assert!(text.contains("Endpoint = vpn.example.com:51820"));
    assert!(text.contains("DNS = 1.1.1.1"));

    let meta_path = h
        .settings
        .user_dir
        .join("admin")
        .join(&peer.id)
        .join("meta.json");
    assert!(meta_path.exists());

    h.manager
        .delete_peer(&peer.id, DeleteMode::Hard, &h.cancel)
        .await
        .expect("delete");
    assert!(!flat.exists());
}

#[tokio::test]
async fn effective_values_are_stored_on_the_record() {
    let h = setup();
    let mut routed = IpPool::new("routed", "10.50.0.0/24");
    routed.routes = "10.50.0.0/24,192.168.0.0/16".to_string();
    routed.dns = "10.50.0.53".to_string();
    h.store.create_pool(&routed).expect("pool");

    let mut req = create_request(&h, "tablet");
    req.ip_pool_id = Some(routed.id.clone());
    let peer = h.manager.create_peer(req, &h.cancel).await.expect("create");

    assert_eq!(peer.allowed_ips, "10.50.0.0/24,192.168.0.0/16");
    assert_eq!(peer.dns, "10.50.0.53");
    assert_eq!(peer.endpoint, "vpn.example.com:51820");
}

#[tokio::test]
async fn backups_accumulate_per_write() {
    let h = setup();
    h.manager
        .create_peer(create_request(&h, "laptop"), &h.cancel)
        .await
        .expect("create");

    let backups = std::fs::read_dir(&h.settings.root_dir)
        .expect("readdir")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".bak."))
        .count();
    assert!(backups >= 1, "a write over an existing file leaves a backup");
}

#[tokio::test]
async fn missing_server_config_is_reported() {
    let h = setup();
    std::fs::remove_file(h.settings.conf_path()).expect("remove");
    let err = h
        .manager
        .create_peer(create_request(&h, "laptop"), &h.cancel)
        .await
        .expect_err("no config");
    assert_eq!(err.kind(), ErrorKind::WgServerConfigNotFound);
}
