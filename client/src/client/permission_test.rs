use super::*;

use std::net::{IpAddr, Ipv4Addr};

fn peer(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
}

#[test]
fn test_permission_state() {
    let p = Permission::default();
    assert_eq!(PermState::Unset, p.state(), "should start unset");
    p.set_state(PermState::Permitted);
    assert_eq!(PermState::Permitted, p.state(), "should match");
}

#[test]
fn test_permission_map_insert_is_strict() {
    let mut m = PermissionMap::new();

    let p1 = Arc::new(Permission::default());
    p1.set_state(PermState::Permitted);
    assert!(m.insert(&peer(5000), p1), "first insert should succeed");

    let p2 = Arc::new(Permission::default());
    assert!(!m.insert(&peer(5000), p2), "second insert should fail");

    // the first entry is untouched
    let found = m.find(&peer(5000)).unwrap();
    assert_eq!(PermState::Permitted, found.state(), "should keep the first entry");
}

#[test]
fn test_permission_map_is_keyed_by_host() {
    let mut m = PermissionMap::new();

    assert!(
        m.insert(&peer(5000), Arc::new(Permission::default())),
        "should insert"
    );
    assert!(
        !m.insert(&peer(6000), Arc::new(Permission::default())),
        "another port of the same host should hit the same entry"
    );
    assert!(
        m.find(&peer(7000)).is_some(),
        "any port of the host should find it"
    );

    m.delete(&peer(8000));
    assert!(m.find(&peer(5000)).is_none(), "should be gone");
}
