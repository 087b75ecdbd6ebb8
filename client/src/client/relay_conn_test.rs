use super::*;

use crate::stun::attributes::{ATTR_REALM, ATTR_USERNAME};
use crate::stun::error_code::CODE_BAD_REQUEST;
use std::sync::atomic::AtomicUsize;
use tokio::time::{advance, sleep, Duration};

#[derive(Copy, Clone)]
enum Respond {
    Success,
    StaleNonce,
    Failure,
    TransportError,
}

struct MockObserver {
    respond: Respond,
    n_transactions: AtomicUsize,
    n_writes: AtomicUsize,
    last_write: Mutex<Vec<u8>>,
}

impl MockObserver {
    fn new(respond: Respond) -> Self {
        MockObserver {
            respond,
            n_transactions: AtomicUsize::new(0),
            n_writes: AtomicUsize::new(0),
            last_write: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl RelayConnObserver for MockObserver {
    fn turn_server_addr(&self) -> SocketAddr {
        "127.0.0.1:3478".parse().unwrap()
    }

    fn username(&self) -> Username {
        Username::new(ATTR_USERNAME, "user".to_owned())
    }

    fn realm(&self) -> Realm {
        Realm::new(ATTR_REALM, "example.org".to_owned())
    }

    async fn write_to(&self, data: &[u8], _to: SocketAddr) -> Result<usize> {
        self.n_writes.fetch_add(1, Ordering::SeqCst);
        let mut last_write = self.last_write.lock().await;
        *last_write = data.to_vec();
        Ok(data.len())
    }

    async fn perform_transaction(
        &self,
        msg: &Message,
        _to: SocketAddr,
        _ignore_result: bool,
    ) -> Result<TransactionResult> {
        self.n_transactions.fetch_add(1, Ordering::SeqCst);

        let mut res = Message::new();
        match self.respond {
            Respond::TransportError => return Err(Error::ErrAllRetransmissionsFailed),
            Respond::Success => {
                res.build(&[
                    Box::new(msg.transaction_id),
                    Box::new(MessageType::new(msg.typ.method, CLASS_SUCCESS_RESPONSE)),
                ])?;
            }
            Respond::StaleNonce => {
                res.build(&[
                    Box::new(msg.transaction_id),
                    Box::new(MessageType::new(msg.typ.method, CLASS_ERROR_RESPONSE)),
                    Box::new(ErrorCodeAttribute {
                        code: CODE_STALE_NONCE,
                        reason: b"Stale Nonce".to_vec(),
                    }),
                    Box::new(Nonce::new(ATTR_NONCE, "new-nonce-123".to_owned())),
                ])?;
            }
            Respond::Failure => {
                res.build(&[
                    Box::new(msg.transaction_id),
                    Box::new(MessageType::new(msg.typ.method, CLASS_ERROR_RESPONSE)),
                    Box::new(ErrorCodeAttribute {
                        code: CODE_BAD_REQUEST,
                        reason: b"Bad Request".to_vec(),
                    }),
                ])?;
            }
        }

        Ok(TransactionResult { msg: res })
    }
}

fn peer() -> SocketAddr {
    "127.0.0.1:1234".parse().unwrap()
}

fn new_internal(respond: Respond) -> Arc<RelayConnInternal<MockObserver>> {
    Arc::new(RelayConnInternal {
        obs: MockObserver::new(respond),
        perm_map: Mutex::new(PermissionMap::new()),
        binding_mgr: Arc::new(Mutex::new(BindingManager::new())),
        integrity: MessageIntegrity::new_short_term_integrity("pass".to_owned()),
        nonce: Mutex::new(Nonce::new(ATTR_NONCE, String::new())),
        closed: AtomicBool::new(false),
    })
}

fn new_conn(
    respond: Respond,
    binding_mgr: Arc<Mutex<BindingManager>>,
    read_ch_rx: mpsc::Receiver<InboundData>,
) -> RelayConn<MockObserver> {
    RelayConn::new(
        MockObserver::new(respond),
        RelayConnConfig {
            relayed_addr: "127.0.0.1:5000".parse().unwrap(),
            integrity: MessageIntegrity::new_short_term_integrity("pass".to_owned()),
            nonce: Nonce::new(ATTR_NONCE, String::new()),
            read_ch_rx,
            binding_mgr,
        },
    )
}

async fn grant(conn: &RelayConn<MockObserver>, addr: SocketAddr) {
    let perm = Arc::new(Permission::default());
    perm.set_state(PermState::Permitted);
    conn.relay_conn.perm_map.lock().await.insert(&addr, perm);
}

async fn wait_for_state(b: &Arc<Binding>, st: BindingState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while b.state() != st {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {:?}, still {:?}",
            st,
            b.state()
        );
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_maybe_bind_idle_success() {
    let conn = new_internal(Respond::Success);
    let b = {
        let mut binding_mgr = conn.binding_mgr.lock().await;
        binding_mgr.create(peer())
    };
    assert_eq!(BindingState::Idle, b.state(), "should start idle");

    RelayConnInternal::maybe_bind(&conn, &b).await;
    wait_for_state(&b, BindingState::Ready).await;

    assert_eq!(
        1,
        conn.obs.n_transactions.load(Ordering::SeqCst),
        "should perform one exchange"
    );
    assert_eq!(1, conn.binding_mgr.lock().await.size(), "should stay registered");
}

#[tokio::test]
async fn test_maybe_bind_noop_when_fresh() {
    let conn = new_internal(Respond::Success);
    let b = {
        let mut binding_mgr = conn.binding_mgr.lock().await;
        binding_mgr.create(peer())
    };
    b.set_state(BindingState::Ready);
    let at = Instant::now();
    b.set_refreshed_at(at).await;

    RelayConnInternal::maybe_bind(&conn, &b).await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(BindingState::Ready, b.state(), "should stay ready");
    assert_eq!(at, b.refreshed_at().await, "refreshed_at should be untouched");
    assert_eq!(
        0,
        conn.obs.n_transactions.load(Ordering::SeqCst),
        "no exchange should run"
    );
}

#[tokio::test(start_paused = true)]
async fn test_maybe_bind_refresh_success() {
    let conn = new_internal(Respond::Success);
    let b = {
        let mut binding_mgr = conn.binding_mgr.lock().await;
        binding_mgr.create(peer())
    };
    b.set_state(BindingState::Ready);
    let before = Instant::now();
    b.set_refreshed_at(before).await;

    advance(BINDING_REFRESH_INTERVAL * 2).await;

    RelayConnInternal::maybe_bind(&conn, &b).await;

    let deadline = Instant::now() + Duration::from_secs(5);
    while b.refreshed_at().await <= before {
        assert!(Instant::now() < deadline, "timed out waiting for the refresh");
        sleep(Duration::from_millis(10)).await;
    }
    wait_for_state(&b, BindingState::Ready).await;

    assert_eq!(
        1,
        conn.obs.n_transactions.load(Ordering::SeqCst),
        "should perform one exchange"
    );
}

#[tokio::test(start_paused = true)]
async fn test_maybe_bind_refresh_stale_nonce() {
    let conn = new_internal(Respond::StaleNonce);
    let b = {
        let mut binding_mgr = conn.binding_mgr.lock().await;
        binding_mgr.create(peer())
    };
    b.set_state(BindingState::Ready);
    b.set_refreshed_at(Instant::now()).await;

    advance(BINDING_REFRESH_INTERVAL * 2).await;

    RelayConnInternal::maybe_bind(&conn, &b).await;
    wait_for_state(&b, BindingState::Failed).await;

    assert_eq!(
        "new-nonce-123",
        conn.nonce.lock().await.text,
        "should store the refreshed nonce"
    );
    assert_eq!(
        1,
        conn.binding_mgr.lock().await.size(),
        "the entry should survive a stale nonce"
    );
}

#[tokio::test]
async fn test_maybe_bind_transport_error_evicts() {
    let conn = new_internal(Respond::TransportError);
    let b = {
        let mut binding_mgr = conn.binding_mgr.lock().await;
        binding_mgr.create(peer())
    };

    RelayConnInternal::maybe_bind(&conn, &b).await;
    wait_for_state(&b, BindingState::Failed).await;

    {
        let binding_mgr = conn.binding_mgr.lock().await;
        assert!(binding_mgr.find_by_addr(&peer()).is_none(), "should be evicted");
        assert!(binding_mgr.find_by_number(b.number).is_none(), "should be evicted");
        assert_eq!(0, binding_mgr.size(), "should be empty");
    }
    assert_eq!("", conn.nonce.lock().await.text, "nonce should be untouched");
}

#[tokio::test]
async fn test_bind_outcome_classification() {
    // transport failure surfaces as-is and evicts the binding
    let conn = new_internal(Respond::TransportError);
    let b = {
        let mut binding_mgr = conn.binding_mgr.lock().await;
        binding_mgr.create(peer())
    };
    let res = conn.bind(&b).await;
    assert_eq!(
        Err(Error::ErrAllRetransmissionsFailed),
        res,
        "should surface the transport error"
    );
    assert_eq!(0, conn.binding_mgr.lock().await.size(), "should evict");

    // a hard error response evicts too, and leaves the nonce alone
    let conn = new_internal(Respond::Failure);
    let b = {
        let mut binding_mgr = conn.binding_mgr.lock().await;
        binding_mgr.create(peer())
    };
    let res = conn.bind(&b).await;
    assert!(res.is_err(), "should fail");
    assert_eq!(0, conn.binding_mgr.lock().await.size(), "should evict");
    assert_eq!("", conn.nonce.lock().await.text, "nonce should be untouched");

    // a stale nonce keeps the entry and refreshes the nonce
    let conn = new_internal(Respond::StaleNonce);
    let b = {
        let mut binding_mgr = conn.binding_mgr.lock().await;
        binding_mgr.create(peer())
    };
    let res = conn.bind(&b).await;
    assert_eq!(Err(Error::ErrTryAgain), res, "should ask for a retry");
    assert_eq!(
        1,
        conn.binding_mgr.lock().await.size(),
        "the entry should survive"
    );
    assert_eq!(
        "new-nonce-123",
        conn.nonce.lock().await.text,
        "should store the refreshed nonce"
    );
}

#[tokio::test]
async fn test_concurrent_maintenance_single_exchange() {
    let conn = new_internal(Respond::Success);
    let b = {
        let mut binding_mgr = conn.binding_mgr.lock().await;
        binding_mgr.create(peer())
    };

    let mut handles = vec![];
    for _ in 0..10 {
        let conn2 = Arc::clone(&conn);
        let b2 = Arc::clone(&b);
        handles.push(tokio::spawn(async move {
            RelayConnInternal::maybe_bind(&conn2, &b2).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    wait_for_state(&b, BindingState::Ready).await;
    assert_eq!(
        1,
        conn.obs.n_transactions.load(Ordering::SeqCst),
        "exactly one exchange should run"
    );
}

#[tokio::test]
async fn test_send_to_channel_path() -> Result<()> {
    let (_read_tx, read_rx) = mpsc::channel(8);
    let binding_mgr = Arc::new(Mutex::new(BindingManager::new()));

    let b = {
        let mut bm = binding_mgr.lock().await;
        bm.create(peer())
    };
    b.set_state(BindingState::Ready);
    b.set_refreshed_at(Instant::now()).await;

    let conn = new_conn(Respond::Success, binding_mgr, read_rx);
    grant(&conn, peer()).await;

    let n = conn.send_to(b"hello", peer()).await?;
    assert_eq!(5, n, "should report the payload length");
    assert_eq!(
        "127.0.0.1:5000".parse::<SocketAddr>().unwrap(),
        conn.local_addr().await?,
        "should report the relayed address"
    );

    let obs = &conn.relay_conn.obs;
    assert_eq!(
        0,
        obs.n_transactions.load(Ordering::SeqCst),
        "no exchange should run"
    );
    assert_eq!(1, obs.n_writes.load(Ordering::SeqCst), "should write once");

    let raw = obs.last_write.lock().await.clone();
    assert!(ChannelData::is_channel_data(&raw), "should use channel framing");

    let mut ch_data = ChannelData {
        raw,
        ..Default::default()
    };
    ch_data.decode()?;
    assert_eq!(b"hello".to_vec(), ch_data.data, "payload should round-trip");
    assert_eq!(ChannelNumber(b.number), ch_data.number, "should use the bound channel");
    Ok(())
}

#[tokio::test]
async fn test_send_to_raw_path_while_maintenance_fails() -> Result<()> {
    let (_read_tx, read_rx) = mpsc::channel(8);
    let binding_mgr = Arc::new(Mutex::new(BindingManager::new()));
    let conn = new_conn(Respond::Failure, Arc::clone(&binding_mgr), read_rx);
    grant(&conn, peer()).await;

    let n = conn.send_to(b"hello", peer()).await?;
    assert_eq!(5, n, "maintenance failure should not surface in the write");

    // the failed bind eventually evicts the binding it claimed
    let deadline = Instant::now() + Duration::from_secs(5);
    while binding_mgr.lock().await.size() != 0 {
        assert!(Instant::now() < deadline, "binding should be evicted");
        sleep(Duration::from_millis(10)).await;
    }

    let raw = conn.relay_conn.obs.last_write.lock().await.clone();
    assert!(is_message(&raw), "should use the indication path");

    let mut msg = Message::new();
    msg.raw = raw;
    msg.decode()?;
    assert_eq!(
        MessageType::new(METHOD_SEND, CLASS_INDICATION),
        msg.typ,
        "should be a send indication"
    );

    let mut data = Data::default();
    data.get_from(&msg)?;
    assert_eq!(b"hello".to_vec(), data.0, "payload should match");

    let mut peer_addr = PeerAddress::default();
    peer_addr.get_from(&msg)?;
    assert_eq!(
        peer(),
        SocketAddr::new(peer_addr.ip, peer_addr.port),
        "peer should match"
    );
    Ok(())
}

#[tokio::test]
async fn test_send_to_permission_failure() {
    let (_read_tx, read_rx) = mpsc::channel(8);
    let binding_mgr = Arc::new(Mutex::new(BindingManager::new()));
    let conn = new_conn(Respond::Failure, binding_mgr, read_rx);

    let res = conn.send_to(b"hello", peer()).await;
    assert!(res.is_err(), "permission failure should fail the write");

    let obs = &conn.relay_conn.obs;
    assert_eq!(0, obs.n_writes.load(Ordering::SeqCst), "nothing should go out");
    assert!(
        conn.relay_conn.perm_map.lock().await.find(&peer()).is_none(),
        "the permission entry should be removed"
    );
}

#[tokio::test]
async fn test_send_to_permission_stale_nonce_retries() {
    let (_read_tx, read_rx) = mpsc::channel(8);
    let binding_mgr = Arc::new(Mutex::new(BindingManager::new()));
    let conn = new_conn(Respond::StaleNonce, binding_mgr, read_rx);

    let res = conn.send_to(b"hello", peer()).await;
    assert_eq!(Err(Error::ErrTryAgain), res, "should give up after the retries");

    let obs = &conn.relay_conn.obs;
    assert_eq!(
        3,
        obs.n_transactions.load(Ordering::SeqCst),
        "should attempt three times"
    );
    assert_eq!(
        "new-nonce-123",
        conn.relay_conn.nonce.lock().await.text,
        "should store the refreshed nonce"
    );
    assert!(
        conn.relay_conn.perm_map.lock().await.find(&peer()).is_some(),
        "the permission entry should survive a stale nonce"
    );
}

#[tokio::test]
async fn test_recv_from() -> Result<()> {
    let (read_tx, read_rx) = mpsc::channel(8);
    let binding_mgr = Arc::new(Mutex::new(BindingManager::new()));
    let conn = new_conn(Respond::Success, binding_mgr, read_rx);

    read_tx
        .send(InboundData {
            data: b"hello".to_vec(),
            from: peer(),
        })
        .await
        .unwrap();

    let mut buf = [0u8; 1500];
    let (n, from) = conn.recv_from(&mut buf).await?;
    assert_eq!(5, n, "should match");
    assert_eq!(b"hello".to_vec(), buf[..n].to_vec(), "should match");
    assert_eq!(peer(), from, "should match");

    read_tx
        .send(InboundData {
            data: vec![0u8; 100],
            from: peer(),
        })
        .await
        .unwrap();

    let mut small = [0u8; 16];
    assert_eq!(
        Err(Error::ErrShortBuffer),
        conn.recv_from(&mut small).await,
        "should reject a short buffer"
    );
    Ok(())
}

#[tokio::test]
async fn test_close() -> Result<()> {
    let (_read_tx, read_rx) = mpsc::channel(8);
    let binding_mgr = Arc::new(Mutex::new(BindingManager::new()));
    let conn = new_conn(Respond::Success, binding_mgr, read_rx);

    conn.close().await?;
    assert_eq!(
        Err(Error::ErrAlreadyClosed),
        conn.close().await,
        "second close should fail"
    );
    assert_eq!(
        Err(Error::ErrAlreadyClosed),
        conn.send_to(b"hello", peer()).await,
        "send after close should fail"
    );

    let mut buf = [0u8; 1500];
    assert_eq!(
        Err(Error::ErrAlreadyClosed),
        conn.recv_from(&mut buf).await,
        "recv after close should fail"
    );
    Ok(())
}
