#[cfg(test)]
#[path = "relay_conn_test.rs"]
mod relay_conn_test;

use crate::client::binding::*;
use crate::client::permission::*;
use crate::client::transaction::TransactionResult;
use crate::error::*;
use crate::proto::chandata::ChannelData;
use crate::proto::channum::ChannelNumber;
use crate::proto::data::Data;
use crate::proto::peeraddr::PeerAddress;
use crate::stun::agent::TransactionId;
use crate::stun::attributes::ATTR_NONCE;
use crate::stun::error_code::{ErrorCodeAttribute, CODE_STALE_NONCE};
use crate::stun::fingerprint::FINGERPRINT;
use crate::stun::integrity::MessageIntegrity;
use crate::stun::message::*;
use crate::stun::textattrs::{Nonce, Realm, Username};
use crate::transport::Conn;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

const MAX_RETRY_ATTEMPTS: usize = 3;

pub(crate) struct InboundData {
    pub(crate) data: Vec<u8>,
    pub(crate) from: SocketAddr,
}

// RelayConnObserver is the contract between a relayed connection and its
// owning client: authenticated request/response exchanges and raw writes
// to the server both ride on the observer.
#[async_trait]
pub trait RelayConnObserver {
    fn turn_server_addr(&self) -> SocketAddr;
    fn username(&self) -> Username;
    fn realm(&self) -> Realm;
    async fn write_to(&self, data: &[u8], to: SocketAddr) -> Result<usize>;
    async fn perform_transaction(
        &self,
        msg: &Message,
        to: SocketAddr,
        ignore_result: bool,
    ) -> Result<TransactionResult>;
}

// RelayConnConfig is a set of config params used by RelayConn::new
pub(crate) struct RelayConnConfig {
    pub(crate) relayed_addr: SocketAddr,
    pub(crate) integrity: MessageIntegrity,
    pub(crate) nonce: Nonce,
    pub(crate) read_ch_rx: mpsc::Receiver<InboundData>,
    pub(crate) binding_mgr: Arc<Mutex<BindingManager>>,
}

// RelayConn is the datagram surface of one allocation. Reads are fed by
// the client's demultiplexer; every write opportunistically drives the
// destination's channel binding forward without ever blocking on it.
pub struct RelayConn<T: 'static + RelayConnObserver + Send + Sync> {
    relayed_addr: SocketAddr,
    read_ch_rx: Mutex<mpsc::Receiver<InboundData>>,
    relay_conn: Arc<RelayConnInternal<T>>,
}

impl<T: 'static + RelayConnObserver + Send + Sync> RelayConn<T> {
    pub(crate) fn new(obs: T, config: RelayConnConfig) -> Self {
        let RelayConnConfig {
            relayed_addr,
            integrity,
            nonce,
            read_ch_rx,
            binding_mgr,
        } = config;

        RelayConn {
            relayed_addr,
            read_ch_rx: Mutex::new(read_ch_rx),
            relay_conn: Arc::new(RelayConnInternal {
                obs,
                perm_map: Mutex::new(PermissionMap::new()),
                binding_mgr,
                integrity,
                nonce: Mutex::new(nonce),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

#[async_trait]
impl<T: 'static + RelayConnObserver + Send + Sync> Conn for RelayConn<T> {
    // recv_from reads the next datagram relayed from a peer. Data queued
    // before close is still drained; afterwards ErrAlreadyClosed.
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let mut read_ch_rx = self.read_ch_rx.lock().await;

        if let Some(ib) = read_ch_rx.recv().await {
            let n = ib.data.len();
            if buf.len() < n {
                return Err(Error::ErrShortBuffer);
            }
            buf[..n].copy_from_slice(&ib.data[..n]);
            Ok((n, ib.from))
        } else {
            Err(Error::ErrAlreadyClosed)
        }
    }

    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        RelayConnInternal::send_to(&self.relay_conn, buf, target).await
    }

    // local_addr returns the relayed transport address allocated on the
    // server.
    async fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.relayed_addr)
    }

    async fn close(&self) -> Result<()> {
        if self.relay_conn.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::ErrAlreadyClosed);
        }

        let mut read_ch_rx = self.read_ch_rx.lock().await;
        read_ch_rx.close();
        Ok(())
    }
}

struct RelayConnInternal<T: 'static + RelayConnObserver + Send + Sync> {
    obs: T,
    perm_map: Mutex<PermissionMap>,
    binding_mgr: Arc<Mutex<BindingManager>>,
    integrity: MessageIntegrity,
    nonce: Mutex<Nonce>,
    closed: AtomicBool,
}

impl<T: 'static + RelayConnObserver + Send + Sync> RelayConnInternal<T> {
    // send_to relays p to addr through the server. A permission for the
    // destination is installed on first use, then the channel binding is
    // nudged forward in the background and the payload goes out over
    // whichever path is valid right now.
    async fn send_to(conn: &Arc<Self>, p: &[u8], addr: SocketAddr) -> Result<usize> {
        if conn.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrAlreadyClosed);
        }

        let perm = {
            let mut perm_map = conn.perm_map.lock().await;
            if let Some(perm) = perm_map.find(&addr) {
                Arc::clone(perm)
            } else {
                let perm = Arc::new(Permission::default());
                perm_map.insert(&addr, Arc::clone(&perm));
                perm
            }
        };

        let mut result = Ok(());
        for _ in 0..MAX_RETRY_ATTEMPTS {
            result = conn.create_permission(&perm, addr).await;
            if let Err(err) = &result {
                if Error::ErrTryAgain != *err {
                    break;
                }
            } else {
                break;
            }
        }
        result?;

        let b = {
            let mut binding_mgr = conn.binding_mgr.lock().await;
            binding_mgr.create(addr)
        };

        Self::maybe_bind(conn, &b).await;

        if b.state() == BindingState::Ready {
            conn.send_channel_data(p, b.number).await?;
        } else {
            conn.send_indication(p, addr).await?;
        }

        Ok(p.len())
    }

    // maybe_bind schedules a bind or refresh exchange for b when one is
    // due. The claim is atomic, so of any number of concurrent writers
    // exactly one spawns the exchange. Nobody waits on it: its outcome
    // shows up in the binding state observed by a later write.
    async fn maybe_bind(conn: &Arc<Self>, b: &Arc<Binding>) {
        let claimed = if b.transition(BindingState::Idle, BindingState::Request) {
            true
        } else if b.state() == BindingState::Ready
            && b.refreshed_at().await.elapsed() >= BINDING_REFRESH_INTERVAL
        {
            b.transition(BindingState::Ready, BindingState::Refresh)
        } else {
            false
        };

        if !claimed {
            return;
        }

        let conn2 = Arc::clone(conn);
        let b2 = Arc::clone(b);
        tokio::spawn(async move {
            match conn2.bind(&b2).await {
                Ok(()) => {
                    b2.set_refreshed_at(Instant::now()).await;
                    b2.set_state(BindingState::Ready);
                }
                Err(err) => {
                    log::warn!("bind for {} failed: {}", b2.addr, err);
                    b2.set_state(BindingState::Failed);
                }
            }
        });
    }

    // bind performs one ChannelBind exchange for b and classifies the
    // outcome. Transport failures and hard error responses evict the
    // binding from the registry. A stale nonce refreshes the stored nonce
    // and keeps the entry, so an immediate retry reuses the channel
    // number.
    async fn bind(&self, b: &Binding) -> Result<()> {
        let msg = {
            let nonce = self.nonce.lock().await.clone();

            let mut msg = Message::new();
            msg.build(&[
                Box::new(TransactionId::new()),
                Box::new(MessageType::new(METHOD_CHANNEL_BIND, CLASS_REQUEST)),
                Box::new(PeerAddress {
                    ip: b.addr.ip(),
                    port: b.addr.port(),
                }),
                Box::new(ChannelNumber(b.number)),
                Box::new(self.obs.username()),
                Box::new(self.obs.realm()),
                Box::new(nonce),
                Box::new(self.integrity.clone()),
                Box::new(FINGERPRINT),
            ])?;
            msg
        };

        log::debug!("sending ChannelBind request for {} ch={}", b.addr, b.number);

        let res = match self
            .obs
            .perform_transaction(&msg, self.obs.turn_server_addr(), false)
            .await
        {
            Ok(tr_res) => tr_res.msg,
            Err(err) => {
                let mut binding_mgr = self.binding_mgr.lock().await;
                binding_mgr.delete_by_addr(&b.addr);
                return Err(err);
            }
        };

        if res.typ.class == CLASS_ERROR_RESPONSE {
            let mut code = ErrorCodeAttribute::default();
            let err = if code.get_from(&res).is_err() {
                Error::Other(format!("{}", res.typ))
            } else if code.code == CODE_STALE_NONCE {
                self.set_nonce_from_msg(&res).await;
                return Err(Error::ErrTryAgain);
            } else {
                Error::Other(format!("{} (error {})", res.typ, code))
            };

            let mut binding_mgr = self.binding_mgr.lock().await;
            binding_mgr.delete_by_addr(&b.addr);
            return Err(err);
        }

        log::debug!("channel binding successful: {} {}", b.addr, b.number);
        Ok(())
    }

    // create_permission installs a relay permission for addr on first
    // use. The per-permission lock serializes concurrent first writes to
    // the same host so the request goes out once.
    async fn create_permission(&self, perm: &Arc<Permission>, addr: SocketAddr) -> Result<()> {
        let _d = perm.exchange_lock().await;

        if perm.state() == PermState::Permitted {
            return Ok(());
        }

        match self.request_permission(addr).await {
            Ok(()) => {
                perm.set_state(PermState::Permitted);
                Ok(())
            }
            // nonce already refreshed, the entry stays for the retry
            Err(Error::ErrTryAgain) => Err(Error::ErrTryAgain),
            Err(err) => {
                let mut perm_map = self.perm_map.lock().await;
                perm_map.delete(&addr);
                Err(err)
            }
        }
    }

    async fn request_permission(&self, addr: SocketAddr) -> Result<()> {
        let msg = {
            let nonce = self.nonce.lock().await.clone();

            let mut msg = Message::new();
            msg.build(&[
                Box::new(TransactionId::new()),
                Box::new(MessageType::new(METHOD_CREATE_PERMISSION, CLASS_REQUEST)),
                Box::new(PeerAddress {
                    ip: addr.ip(),
                    port: addr.port(),
                }),
                Box::new(self.obs.username()),
                Box::new(self.obs.realm()),
                Box::new(nonce),
                Box::new(self.integrity.clone()),
                Box::new(FINGERPRINT),
            ])?;
            msg
        };

        let res = self
            .obs
            .perform_transaction(&msg, self.obs.turn_server_addr(), false)
            .await?;
        let res = res.msg;

        if res.typ.class == CLASS_ERROR_RESPONSE {
            let mut code = ErrorCodeAttribute::default();
            if code.get_from(&res).is_err() {
                return Err(Error::Other(format!("{}", res.typ)));
            } else if code.code == CODE_STALE_NONCE {
                self.set_nonce_from_msg(&res).await;
                return Err(Error::ErrTryAgain);
            } else {
                return Err(Error::Other(format!("{} (error {})", res.typ, code)));
            }
        }

        Ok(())
    }

    // send_indication relays data to peer_addr as a Send indication, the
    // raw path used while no channel binding is ready.
    async fn send_indication(&self, data: &[u8], peer_addr: SocketAddr) -> Result<()> {
        let mut msg = Message::new();
        msg.build(&[
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_SEND, CLASS_INDICATION)),
            Box::new(Data(data.to_vec())),
            Box::new(PeerAddress {
                ip: peer_addr.ip(),
                port: peer_addr.port(),
            }),
            Box::new(FINGERPRINT),
        ])?;

        self.obs
            .write_to(&msg.raw, self.obs.turn_server_addr())
            .await?;
        Ok(())
    }

    async fn send_channel_data(&self, data: &[u8], ch_num: u16) -> Result<()> {
        let mut ch_data = ChannelData {
            data: data.to_vec(),
            number: ChannelNumber(ch_num),
            ..Default::default()
        };
        ch_data.encode();

        self.obs
            .write_to(&ch_data.raw, self.obs.turn_server_addr())
            .await?;
        Ok(())
    }

    async fn set_nonce_from_msg(&self, msg: &Message) {
        match Nonce::get_from_as(msg, ATTR_NONCE) {
            Ok(nonce) => {
                let mut n = self.nonce.lock().await;
                *n = nonce;
                log::debug!("got new nonce from the server");
            }
            Err(_) => log::warn!("stale nonce response carried no new nonce"),
        }
    }
}
