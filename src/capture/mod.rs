//! Link-layer backends
//!
//! The router core never touches sockets. It returns `(interface, frame)`
//! pairs and the driver hands each one to a [`LinkLayer`].

mod af_packet;

pub use af_packet::AfPacketSocket;

use crate::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Transmit side of the link layer
pub trait LinkLayer: Send + Sync {
    /// Send one Ethernet frame out of `interface`
    fn transmit(&self, interface: &str, frame: &[u8]) -> impl Future<Output = Result<()>> + Send;
}

/// One AF_PACKET socket per router interface
#[derive(Default)]
pub struct SocketSet {
    sockets: HashMap<String, Arc<AfPacketSocket>>,
}

impl SocketSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a socket on `name` and keep it
    pub fn bind(&mut self, name: &str) -> Result<Arc<AfPacketSocket>> {
        let socket = Arc::new(AfPacketSocket::bind(name)?);
        self.sockets.insert(name.to_string(), socket.clone());
        Ok(socket)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<AfPacketSocket>> {
        self.sockets.get(name)
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }
}

impl LinkLayer for SocketSet {
    async fn transmit(&self, interface: &str, frame: &[u8]) -> Result<()> {
        let socket = self
            .sockets
            .get(interface)
            .ok_or_else(|| Error::InterfaceNotFound {
                name: interface.to_string(),
            })?;
        socket.send(frame).await?;
        Ok(())
    }
}
