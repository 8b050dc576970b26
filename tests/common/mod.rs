#![allow(dead_code)]
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

/// Minimal Modbus TCP server covering the coil-oriented function codes the
/// breaker PLC contract needs: read coils (0x01), read discrete inputs
/// (0x02) and write single coil (0x05). Supports stall injection to exercise
/// client timeouts.
pub struct MockPlcServer {
    pub addr: SocketAddr,
    coils: Arc<RwLock<HashMap<u16, bool>>>,
    discrete_inputs: Arc<RwLock<HashMap<u16, bool>>>,
    stall: Arc<RwLock<bool>>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl MockPlcServer {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let coils = Arc::new(RwLock::new(HashMap::new()));
        let discrete_inputs = Arc::new(RwLock::new(HashMap::new()));
        let stall = Arc::new(RwLock::new(false));

        let state = ServerState {
            coils: coils.clone(),
            discrete_inputs: discrete_inputs.clone(),
            stall: stall.clone(),
        };
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let state = state.clone();
                tokio::spawn(async move {
                    let _ = state.handle_connection(stream).await;
                });
            }
        });

        Self {
            addr,
            coils,
            discrete_inputs,
            stall,
            accept_task,
        }
    }

    pub async fn set_coil(&self, address: u16, value: bool) {
        self.coils.write().await.insert(address, value);
    }

    pub async fn get_coil(&self, address: u16) -> Option<bool> {
        self.coils.read().await.get(&address).copied()
    }

    pub async fn set_discrete_input(&self, address: u16, value: bool) {
        self.discrete_inputs.write().await.insert(address, value);
    }

    /// When set, requests hang long past any client timeout.
    pub async fn set_stall(&self, enable: bool) {
        *self.stall.write().await = enable;
    }

    /// Stop accepting connections; established sessions die with their tasks.
    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

impl Drop for MockPlcServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

#[derive(Clone)]
struct ServerState {
    coils: Arc<RwLock<HashMap<u16, bool>>>,
    discrete_inputs: Arc<RwLock<HashMap<u16, bool>>>,
    stall: Arc<RwLock<bool>>,
}

impl ServerState {
    async fn handle_connection(&self, mut stream: TcpStream) -> std::io::Result<()> {
        let mut buffer = vec![0u8; 256];
        loop {
            let n = match stream.read(&mut buffer).await {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) => return Err(e),
            };

            if *self.stall.read().await {
                sleep(Duration::from_secs(60)).await;
                return Ok(());
            }

            let response = self.process_request(&buffer[..n]).await;
            stream.write_all(&response).await?;
        }
    }

    async fn process_request(&self, request: &[u8]) -> Vec<u8> {
        if request.len() < 8 {
            return error_response(0, 0, 0, 0x03);
        }
        let transaction_id = u16::from_be_bytes([request[0], request[1]]);
        let unit_id = request[6];
        let function_code = request[7];
        let data = &request[8..];

        match function_code {
            0x01 => self.read_bits(transaction_id, unit_id, 0x01, &self.coils, data).await,
            0x02 => {
                self.read_bits(transaction_id, unit_id, 0x02, &self.discrete_inputs, data)
                    .await
            }
            0x05 => self.write_single_coil(transaction_id, unit_id, data).await,
            _ => error_response(transaction_id, unit_id, function_code, 0x01),
        }
    }

    async fn read_bits(
        &self,
        transaction_id: u16,
        unit_id: u8,
        function_code: u8,
        table: &Arc<RwLock<HashMap<u16, bool>>>,
        data: &[u8],
    ) -> Vec<u8> {
        if data.len() < 4 {
            return error_response(transaction_id, unit_id, function_code, 0x03);
        }
        let start = u16::from_be_bytes([data[0], data[1]]);
        let quantity = u16::from_be_bytes([data[2], data[3]]);
        if quantity == 0 || quantity > 2000 {
            return error_response(transaction_id, unit_id, function_code, 0x03);
        }

        let table = table.read().await;
        let byte_count = quantity.div_ceil(8) as u8;
        let mut bits = vec![0u8; byte_count as usize];
        for i in 0..quantity {
            if table.get(&(start + i)).copied().unwrap_or(false) {
                bits[(i / 8) as usize] |= 1 << (i % 8);
            }
        }

        let mut pdu = vec![function_code, byte_count];
        pdu.extend_from_slice(&bits);
        frame(transaction_id, unit_id, &pdu)
    }

    async fn write_single_coil(&self, transaction_id: u16, unit_id: u8, data: &[u8]) -> Vec<u8> {
        if data.len() < 4 {
            return error_response(transaction_id, unit_id, 0x05, 0x03);
        }
        let address = u16::from_be_bytes([data[0], data[1]]);
        let raw = u16::from_be_bytes([data[2], data[3]]);
        let value = match raw {
            0xFF00 => true,
            0x0000 => false,
            _ => return error_response(transaction_id, unit_id, 0x05, 0x03),
        };
        self.coils.write().await.insert(address, value);

        let mut pdu = vec![0x05];
        pdu.extend_from_slice(&address.to_be_bytes());
        pdu.extend_from_slice(&raw.to_be_bytes());
        frame(transaction_id, unit_id, &pdu)
    }
}

fn frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(7 + pdu.len());
    response.extend_from_slice(&transaction_id.to_be_bytes());
    response.extend_from_slice(&0u16.to_be_bytes());
    response.extend_from_slice(&((pdu.len() as u16 + 1).to_be_bytes()));
    response.push(unit_id);
    response.extend_from_slice(pdu);
    response
}

fn error_response(transaction_id: u16, unit_id: u8, function_code: u8, exception: u8) -> Vec<u8> {
    frame(transaction_id, unit_id, &[function_code | 0x80, exception])
}
