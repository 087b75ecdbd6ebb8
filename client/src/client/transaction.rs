#[cfg(test)]
#[path = "transaction_test.rs"]
mod transaction_test;

use crate::error::*;
use crate::stun::agent::TransactionId;
use crate::stun::message::*;
use crate::transport::Conn;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;

const MAX_RTX_INTERVAL_IN_MS: u16 = 1600;
const MAX_RTX_COUNT: u16 = 7; // total 7 requests (Rc)

async fn on_rtx_timeout(
    conn: &Arc<dyn Conn + Send + Sync>,
    tr_map: &Arc<Mutex<TransactionMap>>,
    tr_key: &TransactionId,
    n_rtx: u16,
) -> bool {
    let mut tm = tr_map.lock().await;
    let (tr_raw, tr_to) = match tm.find(tr_key) {
        Some(tr) => (tr.raw.clone(), tr.to),
        None => return true, // already gone
    };

    if n_rtx == MAX_RTX_COUNT {
        // all retransmissions failed
        if let Some(tr) = tm.delete(tr_key) {
            if !tr
                .write_result(Err(Error::ErrAllRetransmissionsFailed))
                .await
            {
                log::debug!("no listener for transaction");
            }
        }
        return true;
    }

    log::trace!(
        "retransmitting transaction {} to {} (n_rtx={})",
        tr_key,
        tr_to,
        n_rtx
    );

    if let Err(err) = conn.send_to(&tr_raw, tr_to).await {
        if let Some(tr) = tm.delete(tr_key) {
            if !tr.write_result(Err(err)).await {
                log::debug!("no listener for transaction");
            }
        }
        return true;
    }

    false
}

// TransactionResult is a bag of result values of a transaction
#[derive(Debug, Default)]
pub struct TransactionResult {
    pub msg: Message,
}

// TransactionConfig is a set of config params used by Transaction::new
pub struct TransactionConfig {
    pub key: TransactionId,
    pub raw: Vec<u8>,
    pub to: SocketAddr,
    pub interval: u16,
    pub ignore_result: bool, // true to throw away the result of this transaction (it will not be readable using wait_for_result)
}

// Transaction represents an outstanding request and its retransmission
// state.
#[derive(Debug)]
pub struct Transaction {
    pub key: TransactionId,
    pub raw: Vec<u8>,
    pub to: SocketAddr,
    pub n_rtx: Arc<AtomicU16>,
    pub interval: Arc<AtomicU16>,
    timer_ch_tx: Option<mpsc::Sender<()>>,
    result_ch_tx: Option<mpsc::Sender<Result<TransactionResult>>>,
    result_ch_rx: Option<mpsc::Receiver<Result<TransactionResult>>>,
}

impl Transaction {
    pub fn new(config: TransactionConfig) -> Self {
        let (result_ch_tx, result_ch_rx) = if !config.ignore_result {
            let (tx, rx) = mpsc::channel(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        Transaction {
            key: config.key,
            raw: config.raw,
            to: config.to,
            n_rtx: Arc::new(AtomicU16::new(0)),
            interval: Arc::new(AtomicU16::new(config.interval)),
            timer_ch_tx: None,
            result_ch_tx,
            result_ch_rx,
        }
    }

    // start_rtx_timer starts the transaction timer. The interval doubles
    // on every retransmission up to a fixed cap; after the retransmission
    // budget is spent the transaction fails with
    // ErrAllRetransmissionsFailed.
    pub async fn start_rtx_timer(
        &mut self,
        conn: Arc<dyn Conn + Send + Sync>,
        tr_map: Arc<Mutex<TransactionMap>>,
    ) {
        let (timer_ch_tx, mut timer_ch_rx) = mpsc::channel(1);
        self.timer_ch_tx = Some(timer_ch_tx);
        let (n_rtx, interval, key) = (self.n_rtx.clone(), self.interval.clone(), self.key);

        tokio::spawn(async move {
            let mut done = false;
            while !done {
                let timer = tokio::time::sleep(Duration::from_millis(
                    interval.load(Ordering::SeqCst) as u64,
                ));
                tokio::pin!(timer);

                tokio::select! {
                    _ = timer.as_mut() => {
                        let rtx = n_rtx.fetch_add(1, Ordering::SeqCst);

                        let mut val = interval.load(Ordering::SeqCst);
                        val *= 2;
                        if val > MAX_RTX_INTERVAL_IN_MS {
                            val = MAX_RTX_INTERVAL_IN_MS;
                        }
                        interval.store(val, Ordering::SeqCst);

                        done = on_rtx_timeout(&conn, &tr_map, &key, rtx + 1).await;
                    }
                    _ = timer_ch_rx.recv() => done = true,
                }
            }
        });
    }

    // write_result writes the result to the result channel
    pub async fn write_result(&self, res: Result<TransactionResult>) -> bool {
        if let Some(result_ch) = &self.result_ch_tx {
            result_ch.send(res).await.is_ok()
        } else {
            false
        }
    }

    pub fn get_result_channel(&mut self) -> Option<mpsc::Receiver<Result<TransactionResult>>> {
        self.result_ch_rx.take()
    }

    // close closes the transaction. A pending wait on the result channel
    // observes ErrTransactionClosed.
    pub fn close(&mut self) {
        self.result_ch_tx.take();
    }
}

// TransactionMap is a thread-safe transaction map
#[derive(Default, Debug)]
pub struct TransactionMap {
    tr_map: HashMap<TransactionId, Transaction>,
}

impl TransactionMap {
    pub fn new() -> TransactionMap {
        TransactionMap {
            tr_map: HashMap::new(),
        }
    }

    // insert inserts a transaction to the map
    pub fn insert(&mut self, key: TransactionId, tr: Transaction) -> bool {
        self.tr_map.insert(key, tr);
        true
    }

    // find looks up a transaction by its key
    pub fn find(&self, key: &TransactionId) -> Option<&Transaction> {
        self.tr_map.get(key)
    }

    pub fn get(&mut self, key: &TransactionId) -> Option<&mut Transaction> {
        self.tr_map.get_mut(key)
    }

    // delete deletes a transaction by its key. Dropping the transaction
    // also stops its retransmission timer.
    pub fn delete(&mut self, key: &TransactionId) -> Option<Transaction> {
        self.tr_map.remove(key)
    }

    // close_and_delete_all closes and deletes all transactions.
    pub fn close_and_delete_all(&mut self) {
        for tr in self.tr_map.values_mut() {
            tr.close();
        }
        self.tr_map.clear();
    }

    pub fn size(&self) -> usize {
        self.tr_map.len()
    }
}
