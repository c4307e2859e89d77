/**
 * The measurement driver: sends unauthenticated Allocate requests one at a time and records
 * how much bigger each answer is than the request that provoked it.
 *
 * Per request: build, send, wait (bounded), decode, validate, measure, then pause before the
 * next one. Failures only skip the request they happened in.
 */
use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use slog::{debug, info, trace, warn, Logger};
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{sleep, timeout};

use crate::{
    stun::{
        error::{DecodeError, EncodeError},
        error_code::ERROR_CODE_UNAUTHORIZED,
        message::{MessageClass, Method, StunMessage, TransactionId},
        PROTO_UDP,
    },
    utils, Context,
};

mod transport;
pub(crate) use transport::Transport;

/// Largest datagram accepted as a response; STUN responses to an Allocate are far smaller
pub(crate) const RECV_BUFFER_SIZE: usize = 2048;

/**
 * Fatal problems that stop the run before any request is sent
 */
#[derive(Debug, Error)]
pub(crate) enum SetupError {
    #[error("failed to resolve server address {address}: {source}")]
    Resolve { address: String, source: io::Error },

    #[error("server address {0} did not resolve to any socket address")]
    NoAddress(String),

    #[error("failed to open local UDP socket: {0}")]
    Bind(io::Error),

    #[error("failed to connect UDP socket to {address}: {source}")]
    Connect {
        address: SocketAddr,
        source: io::Error,
    },
}

/**
 * Reasons a single request produced no result. The run carries on.
 */
#[derive(Debug, Error)]
pub(crate) enum RequestError {
    #[error("failed to build request: {0}")]
    Encode(#[from] EncodeError),

    #[error("send failed: {0}")]
    Send(io::Error),

    #[error("receive failed: {0}")]
    Receive(io::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("failed to decode response: {0}")]
    Decode(#[from] DecodeError),

    #[error("response exceeds the {0} byte receive buffer")]
    OversizedDatagram(usize),

    #[error("unexpected response {class} {method}")]
    UnexpectedResponse { class: MessageClass, method: Method },
}

/**
 * Outcome of one request/response exchange
 */
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AmplificationResult {
    pub request_size: usize,
    pub response_size: usize,
    pub amplification_factor: f64,
    /// "<code> <reason>" from ERROR-CODE, or the message class when there is none
    pub response_type: String,
    pub error_code: Option<u16>,
    pub has_nonce: bool,
    pub nonce_size: usize,
    /// None when the response carried no FINGERPRINT
    pub fingerprint_valid: Option<bool>,
}

impl AmplificationResult {
    fn new(request_size: usize, response: &Received) -> Self {
        let message = &response.message;
        let error_code = message.error_code();
        let nonce_size = message.nonce().map(<[u8]>::len);

        AmplificationResult {
            request_size,
            response_size: message.encoded_len(),
            amplification_factor: amplification_factor(request_size, message.encoded_len()),
            response_type: match &error_code {
                Some(ec) => ec.to_string(),
                None => message.class.to_string(),
            },
            error_code: error_code.map(|ec| ec.code()),
            has_nonce: nonce_size.is_some(),
            nonce_size: nonce_size.unwrap_or(0),
            fingerprint_valid: response.fingerprint_valid,
        }
    }
}

/**
 * Response size over request size
 */
pub(crate) fn amplification_factor(request_size: usize, response_size: usize) -> f64 {
    if request_size == 0 {
        return 0.0;
    }
    response_size as f64 / request_size as f64
}

// a decoded response matching the request in flight
struct Received {
    message: StunMessage,
    fingerprint_valid: Option<bool>,
}

/**
 * Drives the request loop over a transport it owns
 */
pub(crate) struct Measurement<T: Transport> {
    logger: Logger,
    transport: T,
    read_timeout: Duration,
    interval: Duration,
}

impl<T: Transport + Send + Sync> Measurement<T> {
    /**
     * Creates a new driver. Read deadline and pacing come from the settings in `context`.
     */
    pub fn new(context: &Arc<Context>, transport: T) -> Self {
        Self {
            logger: context.logger.clone(),
            transport,
            read_timeout: context.config.read_timeout(),
            interval: context.config.interval(),
        }
    }

    /**
     * Attempt `count` exchanges in sequence
     *
     * @param count Number of requests to send
     * @return One result per successful exchange, in order
     */
    pub async fn run(&self, count: u32) -> Vec<AmplificationResult> {
        let mut results = Vec::new();

        for i in 1..=count {
            match self.exchange().await {
                Ok(result) => {
                    debug!(
                        self.logger,
                        "Request {}: {} -> {} bytes ({:.2}x), {}",
                        i,
                        result.request_size,
                        result.response_size,
                        result.amplification_factor,
                        result.response_type
                    );
                    results.push(result);
                }
                Err(e) => warn!(self.logger, "Request {} failed: {}", i, e),
            }

            if i < count {
                sleep(self.interval).await;
            }
        }

        info!(
            self.logger,
            "Measurement finished, {} of {} requests answered",
            results.len(),
            count
        );
        results
    }

    /**
     * One request/response exchange
     */
    async fn exchange(&self) -> Result<AmplificationResult, RequestError> {
        let request = StunMessage::allocate_request(TransactionId::random(), PROTO_UDP)?;
        let datagram = request.encode()?;

        trace!(
            self.logger,
            "-->-- [{}]: {}",
            request.transaction_id,
            utils::hex_dump_words(&datagram)
        );
        self.transport
            .send(&datagram)
            .await
            .map_err(RequestError::Send)?;

        let response = timeout(
            self.read_timeout,
            self.await_response(&request.transaction_id),
        )
        .await
        .map_err(|_| RequestError::Timeout(self.read_timeout))??;

        let message = &response.message;
        if message.class != MessageClass::ErrorResponse || message.method != Method::Allocate {
            return Err(RequestError::UnexpectedResponse {
                class: message.class,
                method: message.method,
            });
        }
        if response.fingerprint_valid == Some(false) {
            debug!(
                self.logger,
                "[{}] response FINGERPRINT does not match its content", message.transaction_id
            );
        }
        match message.error_code() {
            Some(ec) if ec.code() == ERROR_CODE_UNAUTHORIZED => {}
            other => debug!(
                self.logger,
                "[{}] expected 401 Unauthorized, got {}",
                message.transaction_id,
                other.map_or_else(|| "no ERROR-CODE".to_string(), |ec| ec.to_string())
            ),
        }
        trace!(
            self.logger,
            "[{}] realm {:?}, software {:?}",
            message.transaction_id,
            message.realm(),
            message.software()
        );

        Ok(AmplificationResult::new(datagram.len(), &response))
    }

    /**
     * Read datagrams until one carries `transaction_id`. Stray messages for other
     * transactions are dropped, anything undecodable fails the request.
     */
    async fn await_response(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Received, RequestError> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE + 1];

        loop {
            let n = self
                .transport
                .recv(&mut buffer)
                .await
                .map_err(RequestError::Receive)?;
            if n > RECV_BUFFER_SIZE {
                return Err(RequestError::OversizedDatagram(RECV_BUFFER_SIZE));
            }

            let raw = &buffer[..n];
            trace!(
                self.logger,
                "--<-- [{}]: {}",
                transaction_id,
                utils::hex_dump_words(raw)
            );

            let message = StunMessage::decode(raw)?;
            if message.transaction_id != *transaction_id {
                debug!(
                    self.logger,
                    "Dropping stray {} {} for transaction {}, waiting for {}",
                    message.class,
                    message.method,
                    message.transaction_id,
                    transaction_id
                );
                continue;
            }

            let fingerprint_valid = message.verify_fingerprint(raw);
            return Ok(Received {
                message,
                fingerprint_valid,
            });
        }
    }
}

/**
 * Resolve `server_address` and open the UDP socket used for the whole run. IPv4 addresses
 * are preferred when the name has both.
 */
async fn open_socket(server_address: &str) -> Result<(UdpSocket, SocketAddr), SetupError> {
    let addresses: Vec<SocketAddr> = lookup_host(server_address)
        .await
        .map_err(|source| SetupError::Resolve {
            address: server_address.to_string(),
            source,
        })?
        .collect();

    let target = addresses
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
        .ok_or_else(|| SetupError::NoAddress(server_address.to_string()))?;

    let local: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await.map_err(SetupError::Bind)?;
    socket
        .connect(target)
        .await
        .map_err(|source| SetupError::Connect {
            address: target,
            source,
        })?;

    Ok((socket, target))
}

/**
 * Measure the amplification factor of the TURN server at `server_address`.
 *
 * @param context Settings (deadline, pacing) and logger
 * @param server_address host:port of the server
 * @param count Number of requests to attempt, 0 is allowed
 * @return Results of the successful exchanges, or the setup failure
 */
pub(crate) async fn measure(
    context: &Arc<Context>,
    server_address: &str,
    count: u32,
) -> Result<Vec<AmplificationResult>, SetupError> {
    let (socket, target) = open_socket(server_address).await?;
    info!(
        context.logger,
        "Probing {} ({}) with {} Allocate requests", server_address, target, count
    );

    let measurement = Measurement::new(context, socket);
    Ok(measurement.run(count).await)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use async_trait::async_trait;
    use slog::o;

    use super::*;
    use crate::config::{environment_type::EnvironmentType, Settings};
    use crate::stun::attribute_type::ATTR_ERROR_CODE;
    use crate::stun::defs::{Attribute, ErrorCode, RawAttribute};

    fn setup_context(read_timeout_ms: u64) -> Arc<Context> {
        Arc::new(Context {
            config: Settings {
                environment: EnvironmentType::development,
                server_address: "127.0.0.1:3478".to_string(),
                request_count: 1,
                read_timeout_ms,
                interval_ms: 0,
                log_level: slog::Level::Trace,
            },
            logger: Logger::root(slog::Discard, o!()),
        })
    }

    /// What a well behaved TURN server says to an Allocate without credentials
    fn unauthorized(transaction_id: TransactionId) -> Vec<u8> {
        let mut msg =
            StunMessage::new(MessageClass::ErrorResponse, Method::Allocate, transaction_id);
        msg.add_attribute(&Attribute::ErrorCode(ErrorCode::new(401, "Unauthorized")))
            .unwrap();
        msg.add_attribute(&Attribute::Nonce(b"f4a1c07e9b2d3e55".to_vec()))
            .unwrap();
        msg.add_fingerprint().unwrap();
        msg.encode().unwrap()
    }

    fn allocate_success(transaction_id: TransactionId) -> Vec<u8> {
        StunMessage::new(MessageClass::SuccessResponse, Method::Allocate, transaction_id)
            .encode()
            .unwrap()
    }

    fn request_id(datagram: &[u8]) -> TransactionId {
        StunMessage::decode(datagram).unwrap().transaction_id
    }

    type Script = Box<dyn Fn(usize, TransactionId) -> Vec<Vec<u8>> + Send + Sync>;

    /**
     * In-memory transport: every send runs the script, whose datagrams are then handed out by
     * recv. An empty inbox never completes, like a server that stays silent.
     */
    struct ScriptedTransport {
        script: Script,
        sent: AtomicUsize,
        inbox: Mutex<VecDeque<Vec<u8>>>,
    }

    impl ScriptedTransport {
        fn new(script: Script) -> Self {
            Self {
                script,
                sent: AtomicUsize::new(0),
                inbox: Mutex::new(VecDeque::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, datagram: &[u8]) -> io::Result<usize> {
            let index = self.sent.fetch_add(1, Ordering::SeqCst);
            let replies = (self.script)(index, request_id(datagram));
            self.inbox.lock().unwrap().extend(replies);
            Ok(datagram.len())
        }

        async fn recv(&self, buffer: &mut [u8]) -> io::Result<usize> {
            let next = self.inbox.lock().unwrap().pop_front();
            match next {
                Some(datagram) => {
                    let n = datagram.len().min(buffer.len());
                    buffer[..n].copy_from_slice(&datagram[..n]);
                    Ok(n)
                }
                None => std::future::pending().await,
            }
        }
    }

    #[test]
    fn test_amplification_arithmetic() {
        let factor = amplification_factor(36, 68);
        assert!((factor - 68.0 / 36.0).abs() < 1e-12);
        assert_eq!(format!("{:.2}", factor), "1.89");
        assert_eq!(amplification_factor(36, 36), 1.0);
        assert_eq!(amplification_factor(0, 68), 0.0);
    }

    #[tokio::test]
    async fn test_unauthorized_responses_are_measured() {
        let transport = ScriptedTransport::new(Box::new(|_, id| vec![unauthorized(id)]));
        let measurement = Measurement::new(&setup_context(1000), transport);

        let results = measurement.run(3).await;

        assert_eq!(results.len(), 3);
        for result in &results {
            assert_eq!(result.request_size, 36);
            assert_eq!(result.response_size, 68);
            assert_eq!(format!("{:.2}", result.amplification_factor), "1.89");
            assert_eq!(result.response_type, "401 Unauthorized");
            assert_eq!(result.error_code, Some(401));
            assert!(result.has_nonce);
            assert_eq!(result.nonce_size, 16);
            assert_eq!(result.fingerprint_valid, Some(true));
        }
        assert_eq!(measurement.transport.sent.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_response_is_skipped() {
        let transport = ScriptedTransport::new(Box::new(|index, id| {
            if index == 1 {
                vec![allocate_success(id)]
            } else {
                vec![unauthorized(id)]
            }
        }));
        let measurement = Measurement::new(&setup_context(1000), transport);

        let results = measurement.run(3).await;
        assert_eq!(results.len(), 2);

        // the script only rejects the second request
        assert!(measurement.exchange().await.is_ok());
    }

    #[tokio::test]
    async fn test_unexpected_response_error() {
        let transport = ScriptedTransport::new(Box::new(|_, id| vec![allocate_success(id)]));
        let measurement = Measurement::new(&setup_context(1000), transport);

        match measurement.exchange().await {
            Err(RequestError::UnexpectedResponse { class, method }) => {
                assert_eq!(class, MessageClass::SuccessResponse);
                assert_eq!(method, Method::Allocate);
            }
            other => panic!("expected UnexpectedResponse, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_response_without_error_code() {
        let transport = ScriptedTransport::new(Box::new(|_, id| {
            vec![StunMessage::new(MessageClass::ErrorResponse, Method::Allocate, id)
                .encode()
                .unwrap()]
        }));
        let measurement = Measurement::new(&setup_context(1000), transport);

        let result = measurement.exchange().await.unwrap();
        assert_eq!(result.response_size, 20);
        assert_eq!(result.response_type, "ErrorResponse");
        assert_eq!(result.error_code, None);
        assert!(!result.has_nonce);
        assert_eq!(result.nonce_size, 0);
        assert_eq!(result.fingerprint_valid, None);
    }

    /// Error response with an ERROR-CODE no sane server would send (class 0, number 7)
    fn weird_error(transaction_id: TransactionId) -> Vec<u8> {
        let mut msg =
            StunMessage::new(MessageClass::ErrorResponse, Method::Allocate, transaction_id);
        let mut value = vec![0, 0, 0, 7];
        value.extend_from_slice(b"Weird");
        msg.add_raw(RawAttribute::new(ATTR_ERROR_CODE, value).unwrap())
            .unwrap();
        msg.add_fingerprint().unwrap();
        msg.encode().unwrap()
    }

    #[tokio::test]
    async fn test_odd_error_code_is_still_measured() {
        let transport = ScriptedTransport::new(Box::new(|_, id| vec![weird_error(id)]));
        let measurement = Measurement::new(&setup_context(1000), transport);

        let results = measurement.run(3).await;

        assert_eq!(results.len(), 3);
        for result in &results {
            // 20 header + 16 ERROR-CODE + 8 FINGERPRINT
            assert_eq!(result.response_size, 44);
            assert_eq!(result.response_type, "ErrorResponse");
            assert_eq!(result.error_code, None);
            assert_eq!(result.fingerprint_valid, Some(true));
        }
    }

    #[tokio::test]
    async fn test_stray_transaction_is_ignored() {
        let transport = ScriptedTransport::new(Box::new(|_, id| {
            vec![
                unauthorized(TransactionId::from([7u8; 12])),
                allocate_success(TransactionId::from([8u8; 12])),
                unauthorized(id),
            ]
        }));
        let measurement = Measurement::new(&setup_context(1000), transport);

        let results = measurement.run(2).await;
        assert_eq!(results.len(), 2);
        assert!(measurement.transport.inbox.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let transport = ScriptedTransport::new(Box::new(|_, _| Vec::new()));
        let measurement = Measurement::new(&setup_context(50), transport);

        match measurement.exchange().await {
            Err(RequestError::Timeout(d)) => assert_eq!(d, Duration::from_millis(50)),
            other => panic!("expected Timeout, got {:?}", other),
        }
        assert!(measurement.run(2).await.is_empty());
        assert_eq!(measurement.transport.sent.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_only_stray_traffic_times_out() {
        let transport = ScriptedTransport::new(Box::new(|_, _| {
            vec![unauthorized(TransactionId::from([1u8; 12]))]
        }));
        let measurement = Measurement::new(&setup_context(50), transport);

        assert!(matches!(
            measurement.exchange().await,
            Err(RequestError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_is_a_decode_failure() {
        let transport = ScriptedTransport::new(Box::new(|index, id| {
            if index == 0 {
                vec![b"HTTP/1.1 400 Bad Request\r\n\r\n".to_vec()]
            } else {
                vec![unauthorized(id)]
            }
        }));
        let measurement = Measurement::new(&setup_context(1000), transport);

        assert!(matches!(
            measurement.exchange().await,
            Err(RequestError::Decode(_))
        ));
        assert_eq!(measurement.run(1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_truncated_response_is_a_decode_failure() {
        let transport = ScriptedTransport::new(Box::new(|_, id| {
            let mut datagram = unauthorized(id);
            datagram.truncate(40);
            vec![datagram]
        }));
        let measurement = Measurement::new(&setup_context(1000), transport);

        assert!(matches!(
            measurement.exchange().await,
            Err(RequestError::Decode(DecodeError::LengthMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_oversized_datagram_is_rejected() {
        let transport = ScriptedTransport::new(Box::new(|_, id| {
            let mut msg = StunMessage::new(MessageClass::ErrorResponse, Method::Allocate, id);
            msg.add_attribute(&Attribute::Nonce(vec![0x41; 3000])).unwrap();
            vec![msg.encode().unwrap()]
        }));
        let measurement = Measurement::new(&setup_context(1000), transport);

        assert!(matches!(
            measurement.exchange().await,
            Err(RequestError::OversizedDatagram(RECV_BUFFER_SIZE))
        ));
    }

    #[tokio::test]
    async fn test_zero_requests() {
        let transport = ScriptedTransport::new(Box::new(|_, id| vec![unauthorized(id)]));
        let measurement = Measurement::new(&setup_context(1000), transport);

        assert!(measurement.run(0).await.is_empty());
        assert_eq!(measurement.transport.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_every_request_uses_a_fresh_transaction_id() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let transport = ScriptedTransport::new(Box::new(move |_, id| {
            recorder.lock().unwrap().push(id);
            vec![unauthorized(id)]
        }));
        let measurement = Measurement::new(&setup_context(1000), transport);
        measurement.run(5).await;

        let mut ids = seen.lock().unwrap().clone();
        assert_eq!(ids.len(), 5);
        ids.sort_by_key(|id| *id.as_bytes());
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    /// Loopback stand-in for a TURN server answering every Allocate with 401
    async fn spawn_fake_turn_server() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];
            loop {
                let Ok((n, peer)) = socket.recv_from(&mut buffer).await else {
                    break;
                };
                let Ok(request) = StunMessage::decode(&buffer[..n]) else {
                    continue;
                };
                let _ = socket
                    .send_to(&unauthorized(request.transaction_id), peer)
                    .await;
            }
        });
        address
    }

    #[tokio::test]
    async fn test_measure_against_loopback_server() {
        let address = spawn_fake_turn_server().await;

        let results = measure(&setup_context(1000), &address.to_string(), 3)
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.response_size == 68));
    }

    #[tokio::test]
    async fn test_measure_zero_requests() {
        let address = spawn_fake_turn_server().await;

        let results = measure(&setup_context(1000), &address.to_string(), 0)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_measure_unreachable_server() {
        // bind and drop to get a port nobody listens on
        let address = {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            socket.local_addr().unwrap()
        };

        let results = measure(&setup_context(100), &address.to_string(), 2)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_measure_unresolvable_address() {
        let err = measure(&setup_context(100), "no port here", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::Resolve { .. }));
    }
}
