use super::*;

use async_trait::async_trait;
use std::io;
use std::sync::atomic::AtomicUsize;

struct CountingConn {
    n_sent: AtomicUsize,
    fail: bool,
}

impl CountingConn {
    fn new(fail: bool) -> Self {
        CountingConn {
            n_sent: AtomicUsize::new(0),
            fail,
        }
    }
}

#[async_trait]
impl Conn for CountingConn {
    async fn recv_from(&self, _buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Err(Error::Other("not implemented".to_owned()))
    }

    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> Result<usize> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::Other, "send failed").into());
        }
        self.n_sent.fetch_add(1, Ordering::SeqCst);
        Ok(buf.len())
    }

    async fn local_addr(&self) -> Result<SocketAddr> {
        Ok("127.0.0.1:9000".parse().unwrap())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn config(interval: u16, ignore_result: bool) -> TransactionConfig {
    TransactionConfig {
        key: TransactionId::new(),
        raw: vec![1, 2, 3],
        to: "127.0.0.1:3478".parse().unwrap(),
        interval,
        ignore_result,
    }
}

#[tokio::test]
async fn test_transaction_result_channel() {
    let mut tr = Transaction::new(config(200, false));
    let mut result_ch_rx = tr.get_result_channel().expect("should have a result channel");

    assert!(
        tr.write_result(Ok(TransactionResult::default())).await,
        "should have a listener"
    );
    let res = result_ch_rx.recv().await.expect("should receive a result");
    assert!(res.is_ok(), "should be a success result");
}

#[tokio::test]
async fn test_transaction_ignore_result() {
    let mut tr = Transaction::new(config(200, true));
    assert!(
        tr.get_result_channel().is_none(),
        "should have no result channel"
    );
    assert!(
        !tr.write_result(Ok(TransactionResult::default())).await,
        "should have no listener"
    );
}

#[tokio::test]
async fn test_transaction_close_drops_result() {
    let mut tr = Transaction::new(config(200, false));
    let mut result_ch_rx = tr.get_result_channel().expect("should have a result channel");

    tr.close();
    assert!(
        result_ch_rx.recv().await.is_none(),
        "closed transaction should yield no result"
    );
}

#[tokio::test]
async fn test_transaction_map() {
    let mut tm = TransactionMap::new();
    assert_eq!(0, tm.size(), "should be empty");

    let tr = Transaction::new(config(200, false));
    let key = tr.key;
    tm.insert(key, tr);
    assert_eq!(1, tm.size(), "should have one transaction");
    assert!(tm.find(&key).is_some(), "should find the transaction");
    assert!(tm.get(&key).is_some(), "should get the transaction");

    assert!(tm.delete(&key).is_some(), "should delete");
    assert!(tm.find(&key).is_none(), "should be gone");
    assert_eq!(0, tm.size(), "should be empty");
}

#[tokio::test]
async fn test_transaction_map_close_and_delete_all() {
    let mut tm = TransactionMap::new();

    let mut tr1 = Transaction::new(config(200, false));
    let mut rx1 = tr1.get_result_channel().expect("should have a result channel");
    let mut tr2 = Transaction::new(config(200, false));
    let mut rx2 = tr2.get_result_channel().expect("should have a result channel");

    tm.insert(tr1.key, tr1);
    tm.insert(tr2.key, tr2);
    tm.close_and_delete_all();

    assert_eq!(0, tm.size(), "should be empty");
    assert!(rx1.recv().await.is_none(), "waiter should be failed");
    assert!(rx2.recv().await.is_none(), "waiter should be failed");
}

#[tokio::test(start_paused = true)]
async fn test_transaction_rtx_exhaustion() {
    let cc = Arc::new(CountingConn::new(false));
    let conn: Arc<dyn Conn + Send + Sync> = cc.clone();
    let tr_map = Arc::new(Mutex::new(TransactionMap::new()));

    let mut tr = Transaction::new(config(200, false));
    let key = tr.key;
    let mut result_ch_rx = tr.get_result_channel().expect("should have a result channel");

    {
        let mut tm = tr_map.lock().await;
        tm.insert(key, tr);
        let tr = tm.get(&key).expect("should be in the map");
        tr.start_rtx_timer(Arc::clone(&conn), Arc::clone(&tr_map))
            .await;
    }

    let res = result_ch_rx.recv().await.expect("should receive a result");
    match res {
        Err(err) => assert_eq!(
            Error::ErrAllRetransmissionsFailed,
            err,
            "should report exhaustion"
        ),
        Ok(_) => panic!("expected the transaction to fail"),
    }

    // the original request is sent by the caller; the timer resent six
    // times before giving up on the seventh expiry
    assert_eq!(6, cc.n_sent.load(Ordering::SeqCst), "should match");
    assert_eq!(0, tr_map.lock().await.size(), "should be removed from the map");
}

#[tokio::test(start_paused = true)]
async fn test_transaction_rtx_send_failure() {
    let conn: Arc<dyn Conn + Send + Sync> = Arc::new(CountingConn::new(true));
    let tr_map = Arc::new(Mutex::new(TransactionMap::new()));

    let mut tr = Transaction::new(config(200, false));
    let key = tr.key;
    let mut result_ch_rx = tr.get_result_channel().expect("should have a result channel");

    {
        let mut tm = tr_map.lock().await;
        tm.insert(key, tr);
        let tr = tm.get(&key).expect("should be in the map");
        tr.start_rtx_timer(Arc::clone(&conn), Arc::clone(&tr_map))
            .await;
    }

    let res = result_ch_rx.recv().await.expect("should receive a result");
    match res {
        Err(err) => assert_eq!(
            Error::Io(IoError(io::Error::new(io::ErrorKind::Other, "send failed"))),
            err,
            "should carry the send error"
        ),
        Ok(_) => panic!("expected the transaction to fail"),
    }

    assert_eq!(0, tr_map.lock().await.size(), "should be removed from the map");
}
