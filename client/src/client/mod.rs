
pub(crate) mod binding;
pub(crate) mod permission;
pub mod relay_conn;
pub mod transaction;

use binding::BindingManager;
use relay_conn::{InboundData, RelayConn, RelayConnConfig, RelayConnObserver};
use transaction::{Transaction, TransactionConfig, TransactionMap, TransactionResult};

use crate::error::*;
use crate::proto::chandata::ChannelData;
use crate::proto::data::Data;
use crate::proto::peeraddr::PeerAddress;
use crate::stun::attributes::{ATTR_REALM, ATTR_USERNAME};
use crate::stun::integrity::MessageIntegrity;
use crate::stun::message::*;
use crate::stun::textattrs::{Nonce, Realm, Username};
use crate::transport::Conn;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

const DEFAULT_RTO_IN_MS: u16 = 200;
const MAX_READ_QUEUE_SIZE: usize = 1024;

// ClientConfig is a bag of config parameters used by Client::new
pub struct ClientConfig {
    pub conn: Arc<dyn Conn + Send + Sync>,
    pub server_addr: SocketAddr,
    pub username: String,
    pub realm: String,
    pub rto_in_ms: u16,
}

// Client performs the authenticated exchanges a relayed connection needs
// and demultiplexes what the server sends back. The transport and its
// read loop stay with the caller, which pumps every received datagram
// into handle_inbound. Clones share one transaction map, binding
// registry and read queue.
#[derive(Clone)]
pub struct Client {
    conn: Arc<dyn Conn + Send + Sync>,
    server_addr: SocketAddr,
    username: Username,
    realm: Realm,
    rto_in_ms: u16,
    tr_map: Arc<Mutex<TransactionMap>>,
    binding_mgr: Arc<Mutex<BindingManager>>,
    read_ch_tx: Arc<Mutex<Option<mpsc::Sender<InboundData>>>>,
}

impl Client {
    // new returns a new Client instance.
    pub fn new(config: ClientConfig) -> Self {
        Client {
            conn: config.conn,
            server_addr: config.server_addr,
            username: Username::new(ATTR_USERNAME, config.username),
            realm: Realm::new(ATTR_REALM, config.realm),
            rto_in_ms: if config.rto_in_ms != 0 {
                config.rto_in_ms
            } else {
                DEFAULT_RTO_IN_MS
            },
            tr_map: Arc::new(Mutex::new(TransactionMap::new())),
            binding_mgr: Arc::new(Mutex::new(BindingManager::new())),
            read_ch_tx: Arc::new(Mutex::new(None)),
        }
    }

    // relay wires an allocation obtained elsewhere into a relayed
    // connection. The caller passes the relayed transport address along
    // with the long-term-credential integrity and the nonce the
    // allocation currently holds. One relayed connection at a time; a
    // new one can be created after close.
    pub async fn relay(
        &self,
        relayed_addr: SocketAddr,
        integrity: MessageIntegrity,
        nonce: Nonce,
    ) -> Result<RelayConn<Client>> {
        let mut read_ch_tx = self.read_ch_tx.lock().await;
        if read_ch_tx.is_some() {
            return Err(Error::Other("already relaying".to_owned()));
        }

        let (tx, rx) = mpsc::channel(MAX_READ_QUEUE_SIZE);
        *read_ch_tx = Some(tx);

        Ok(RelayConn::new(
            self.clone(),
            RelayConnConfig {
                relayed_addr,
                integrity,
                nonce,
                read_ch_rx: rx,
                binding_mgr: Arc::clone(&self.binding_mgr),
            },
        ))
    }

    // handle_inbound classifies a datagram received on the underlying
    // transport and routes it.
    //
    // +-------------------+-------------------------------+
    // |   Message Type    |     Operation                 |
    // +-------------------+-------------------------------+
    // | STUN response     | hand to pending transaction   |
    // | Data indication   | queue for recv_from           |
    // | ChannelData       | queue for recv_from           |
    // | Other             | discard                       |
    // +-------------------+-------------------------------+
    pub async fn handle_inbound(&self, data: &[u8], from: SocketAddr) -> Result<()> {
        if is_message(data) {
            self.handle_stun_message(data, from).await
        } else if ChannelData::is_channel_data(data) {
            self.handle_channel_data(data).await
        } else {
            log::trace!("non-STUN/TURN packet from {}, unhandled", from);
            Ok(())
        }
    }

    async fn handle_stun_message(&self, data: &[u8], from: SocketAddr) -> Result<()> {
        let mut msg = Message::new();
        msg.raw = data.to_vec();
        msg.decode()?;

        if msg.typ.class == CLASS_REQUEST {
            return Err(Error::Other(format!(
                "unexpected STUN request from {}: {:?}",
                from, msg,
            )));
        }

        if msg.typ.class == CLASS_INDICATION {
            if msg.typ.method == METHOD_DATA {
                let mut peer_addr = PeerAddress::default();
                peer_addr.get_from(&msg)?;
                let from = SocketAddr::new(peer_addr.ip, peer_addr.port);

                let mut data = Data::default();
                data.get_from(&msg)?;

                log::debug!("data indication received from {}", from);
                self.deliver(data.0, from).await;
            }

            return Ok(());
        }

        // success or error response, hand over to the waiting transaction
        let tr = {
            let mut tm = self.tr_map.lock().await;
            match tm.delete(&msg.transaction_id) {
                Some(tr) => tr,
                None => {
                    // silently discard
                    log::debug!("no transaction for {}", msg.typ);
                    return Ok(());
                }
            }
        };

        if !tr.write_result(Ok(TransactionResult { msg })).await {
            log::debug!("no listener for the transaction result");
        }

        Ok(())
    }

    async fn handle_channel_data(&self, data: &[u8]) -> Result<()> {
        let mut ch_data = ChannelData {
            raw: data.to_vec(),
            ..Default::default()
        };
        ch_data.decode()?;

        let addr = {
            let binding_mgr = self.binding_mgr.lock().await;
            match binding_mgr.find_by_number(ch_data.number.0) {
                Some(b) => b.addr,
                None => {
                    return Err(Error::Other(format!(
                        "no binding with channel {}",
                        ch_data.number
                    )));
                }
            }
        };

        log::trace!("channel data received from {}", addr);
        self.deliver(ch_data.data, addr).await;

        Ok(())
    }

    // deliver queues relayed application data for recv_from. The queue
    // is bounded; when it is full the datagram is dropped, as a socket
    // would.
    async fn deliver(&self, data: Vec<u8>, from: SocketAddr) {
        let read_ch_tx = self.read_ch_tx.lock().await;

        if let Some(tx) = &*read_ch_tx {
            match tx.try_send(InboundData { data, from }) {
                Ok(_) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("receive buffer full, dropping data from {}", from);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    // close fails all outstanding transactions and detaches the relayed
    // connection's read queue.
    pub async fn close(&self) {
        {
            let mut read_ch_tx = self.read_ch_tx.lock().await;
            read_ch_tx.take();
        }
        {
            let mut tm = self.tr_map.lock().await;
            tm.close_and_delete_all();
        }
    }
}

#[async_trait]
impl RelayConnObserver for Client {
    fn turn_server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    fn username(&self) -> Username {
        self.username.clone()
    }

    fn realm(&self) -> Realm {
        self.realm.clone()
    }

    // write_to sends data to the server via the underlying transport.
    async fn write_to(&self, data: &[u8], to: SocketAddr) -> Result<usize> {
        let n = self.conn.send_to(data, to).await?;
        Ok(n)
    }

    // perform_transaction sends msg to the server, retransmitting on the
    // transaction timer, and waits for the response unless ignore_result
    // is set.
    async fn perform_transaction(
        &self,
        msg: &Message,
        to: SocketAddr,
        ignore_result: bool,
    ) -> Result<TransactionResult> {
        let tr_key = msg.transaction_id;

        let mut tr = Transaction::new(TransactionConfig {
            key: tr_key,
            raw: msg.raw.clone(),
            to,
            interval: self.rto_in_ms,
            ignore_result,
        });
        let result_ch_rx = tr.get_result_channel();

        log::trace!("start {} transaction {} to {}", msg.typ, tr_key, to);
        {
            let mut tm = self.tr_map.lock().await;
            tm.insert(tr_key, tr);
        }

        if let Err(err) = self.conn.send_to(&msg.raw, to).await {
            let mut tm = self.tr_map.lock().await;
            tm.delete(&tr_key);
            return Err(err);
        }

        {
            let mut tm = self.tr_map.lock().await;
            if let Some(tr) = tm.get(&tr_key) {
                tr.start_rtx_timer(Arc::clone(&self.conn), Arc::clone(&self.tr_map))
                    .await;
            }
        }

        if ignore_result {
            // the transaction is left running; its result is discarded
            return Ok(TransactionResult::default());
        }

        let mut result_ch_rx = match result_ch_rx {
            Some(rx) => rx,
            None => return Err(Error::ErrWaitForResultOnNonResultTransaction),
        };

        match result_ch_rx.recv().await {
            Some(res) => res,
            None => Err(Error::ErrTransactionClosed),
        }
    }
}
