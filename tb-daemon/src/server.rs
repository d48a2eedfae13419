//! Unix Socket Server
//!
//! Hosts the thermal API on a Unix domain socket. Each connection carries a
//! sequence of transactions; every transaction is handed to
//! [`ThermalApiService::on_transact`] together with the peer's credentials.
//!
//! # Limits
//! - Concurrent connections are capped, extra clients are dropped on accept
//! - Parcels larger than `MAX_PARCEL_SIZE` are refused before buffering
//! - Reads and writes time out so a stalled client cannot pin a task

use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use tb_core::constants::ipc;
use tb_core::{CallerIdentity, ThermalApiService};
use tb_error::ThermalError;
use tb_protocol::{
    Parcel, ReplyHeader, TransactionHeader, TransportStatus, TRANSACTION_HEADER_SIZE,
};

/// Socket permissions (0666): the interface token is the only gate
const SOCKET_MODE: u32 = 0o666;

/// Connection limits, taken from the daemon config
#[derive(Debug, Clone, Copy)]
pub struct ServerLimits {
    pub max_connections: usize,
    pub read_timeout: Duration,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: ipc::MAX_CONNECTIONS,
            read_timeout: Duration::from_millis(ipc::READ_TIMEOUT_MS),
        }
    }
}

/// Bind the socket, refusing to replace a symlink
pub fn bind_listener(socket_path: &str) -> std::io::Result<UnixListener> {
    let path = Path::new(socket_path);

    if let Ok(metadata) = path.symlink_metadata() {
        if metadata.file_type().is_symlink() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "Socket path is a symlink - refusing to replace it",
            ));
        }
        std::fs::remove_file(path)?;
        debug!("Removed stale socket file");
    }

    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
    info!("Listening on {} (mode {:o})", socket_path, SOCKET_MODE);
    Ok(listener)
}

/// Bind, serve until `shutdown` resolves, then remove the socket
pub async fn run_server(
    socket_path: &str,
    service: ThermalApiService,
    limits: ServerLimits,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = bind_listener(socket_path)?;
    serve(listener, service, limits, shutdown).await;

    if let Err(e) = std::fs::remove_file(socket_path) {
        debug!("Socket already gone: {}", e);
    }
    Ok(())
}

/// Accept loop
pub async fn serve(
    listener: UnixListener,
    service: ThermalApiService,
    limits: ServerLimits,
    shutdown: impl Future<Output = ()>,
) {
    info!(
        "Limits: max_conn={}, max_parcel={}, read_timeout={:?}",
        limits.max_connections,
        tb_protocol::MAX_PARCEL_SIZE,
        limits.read_timeout
    );

    let active = Arc::new(AtomicUsize::new(0));
    let mut accepted: u64 = 0;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = active.load(Ordering::SeqCst);
                        if current >= limits.max_connections {
                            warn!("Connection limit reached ({}), rejecting new connection", current);
                            drop(stream);
                            continue;
                        }

                        active.fetch_add(1, Ordering::SeqCst);
                        accepted += 1;
                        let active = active.clone();
                        let service = service.clone();

                        tokio::spawn(async move {
                            handle_client(stream, service, limits.read_timeout).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Server stopped (handled {} total connections)", accepted);
}

/// Client credentials from the Unix socket peer
#[derive(Debug, Clone, Copy)]
struct PeerCredentials {
    uid: u32,
    gid: u32,
    pid: i32,
}

impl From<PeerCredentials> for CallerIdentity {
    fn from(cred: PeerCredentials) -> Self {
        CallerIdentity { pid: cred.pid, uid: cred.uid }
    }
}

async fn handle_client(stream: UnixStream, service: ThermalApiService, read_timeout: Duration) {
    let cred = match get_peer_credentials(&stream) {
        Some(c) => c,
        None => {
            error!("Failed to get peer credentials, rejecting connection");
            return;
        }
    };
    debug!("Connection from uid={}, gid={}, pid={}", cred.uid, cred.gid, cred.pid);

    let (mut reader, mut writer) = stream.into_split();
    let mut transactions: u64 = 0;
    let connection_start = Instant::now();

    loop {
        let frame = match timeout(read_timeout, read_frame(&mut reader)).await {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                debug!(
                    "Client disconnected: pid={}, transactions={}, duration={:?}",
                    cred.pid,
                    transactions,
                    connection_start.elapsed()
                );
                break;
            }
            Ok(Err(ThermalError::MessageTooLarge { size, max_size })) => {
                warn!(
                    "Parcel too large ({} > {} bytes) from uid={}, pid={}",
                    size, max_size, cred.uid, cred.pid
                );
                let _ = send_reply(&mut writer, TransportStatus::BadValue, &Parcel::new()).await;
                break;
            }
            Ok(Err(e)) => {
                error!("Read error from uid={}, pid={}: {}", cred.uid, cred.pid, e);
                break;
            }
            Err(_) => {
                debug!("Read timeout for uid={}, pid={}", cred.uid, cred.pid);
                break;
            }
        };

        let (header, mut data) = frame;
        transactions += 1;
        trace!("Transaction #{} from pid={}: {} bytes", transactions, cred.pid, header.len);

        // The service may block on its lock or the zone loader
        let code = header.code;
        let svc = service.clone();
        let caller: CallerIdentity = cred.into();
        let (status, reply) = match tokio::task::spawn_blocking(move || {
            let mut reply = Parcel::new();
            let status = svc.on_transact(code, &mut data, &mut reply, caller);
            (status, reply)
        })
        .await
        {
            Ok(done) => done,
            Err(e) => {
                error!("Transaction task failed for pid={}: {}", cred.pid, e);
                break;
            }
        };

        if header.is_oneway() {
            continue;
        }
        if send_reply(&mut writer, status, &reply).await.is_err() {
            break;
        }
    }
}

/// Read one transaction frame; `None` on EOF before any header byte
async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<(TransactionHeader, Parcel)>, ThermalError> {
    let mut raw = [0u8; TRANSACTION_HEADER_SIZE];
    let mut filled = 0;
    while filled < raw.len() {
        match reader.read(&mut raw[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => return Err(ThermalError::malformed("truncated transaction header")),
            n => filled += n,
        }
    }

    let header = TransactionHeader::decode(&raw)?;
    let mut body = vec![0u8; header.len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some((header, Parcel::from_bytes(body))))
}

/// Send a reply frame with the write timeout applied
async fn send_reply<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: TransportStatus,
    reply: &Parcel,
) -> Result<(), ()> {
    let header = ReplyHeader { status: status.raw(), len: reply.len() as u32 };

    let write_result = timeout(ipc::WRITE_TIMEOUT, async {
        writer.write_all(&header.encode()).await?;
        writer.write_all(reply.as_bytes()).await?;
        writer.flush().await?;
        Ok::<_, std::io::Error>(())
    })
    .await;

    match write_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}

/// Peer credentials (uid, gid, pid) from the Unix socket
fn get_peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();

    #[cfg(target_os = "linux")]
    {
        // SAFETY: ucred is a plain C struct; all-zero is a valid value.
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: fd is a live socket owned by `stream`, and cred/len describe
        // a writable buffer of the right size.
        let result = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };

        if result == 0 {
            return Some(PeerCredentials { uid: cred.uid, gid: cred.gid, pid: cred.pid });
        }
    }

    #[cfg(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly",
        target_os = "macos"
    ))]
    {
        let mut uid: libc::uid_t = 0;
        let mut gid: libc::gid_t = 0;

        // SAFETY: fd is a live socket and uid/gid are valid out-pointers.
        let result = unsafe { libc::getpeereid(fd, &mut uid, &mut gid) };

        if result == 0 {
            // getpeereid does not report a pid
            return Some(PeerCredentials { uid, gid, pid: 0 });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tb_core::{AssemblyState, Session, ThermalApiClient};
    use tb_protocol::{
        Opcode, ProfileStartMessage, Request, ZoneMessage, FLAG_ONEWAY, MAX_PARCEL_SIZE,
        REPLY_HEADER_SIZE,
    };
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    fn start(dir: &TempDir, service: ThermalApiService) -> (String, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let path = dir.path().join("tb.sock").to_string_lossy().into_owned();
        let listener = bind_listener(&path).unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve(listener, service, ServerLimits::default(), async move {
            let _ = rx.await;
        }));
        (path, tx, handle)
    }

    #[tokio::test]
    async fn test_client_session_over_socket() {
        let dir = TempDir::new().unwrap();
        let service = ThermalApiService::new(Session::default());
        let (path, stop, handle) = start(&dir, service.clone());

        let statuses = tokio::task::spawn_blocking(move || {
            let mut client = ThermalApiClient::connect(&path).unwrap();
            vec![
                client.send_profile_start(1).unwrap(),
                client.send_zone("CPU0", 80, 95).unwrap(),
                client.send_sensor("TC0", "/s0").unwrap(),
                client.send_cdev("FN0", "/c0", 0, 1, 1).unwrap(),
                client.send_throttle("FN0", 2).unwrap(),
            ]
        })
        .await
        .unwrap();

        assert_eq!(statuses, vec![0, 0, 0, 0, 0]);
        let snap = service.snapshot();
        assert_eq!(snap.state, AssemblyState::Building);
        assert_eq!(snap.zones.len(), 1);
        assert_eq!(snap.zones[0].num_sensors(), 1);
        assert_eq!(snap.zones[0].num_cdevs(), 1);

        stop.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_oneway_calls_are_applied_without_reply() {
        let dir = TempDir::new().unwrap();
        let service = ThermalApiService::new(Session::default());
        let (path, stop, handle) = start(&dir, service.clone());

        let status = tokio::task::spawn_blocking(move || {
            let mut client = ThermalApiClient::connect(&path).unwrap();
            client
                .send_oneway(&Request::ProfileStart(ProfileStartMessage::new(1)))
                .unwrap();
            client.send_oneway(&Request::Zone(ZoneMessage::new("GPU", 70, 90))).unwrap();
            // The next reply must belong to this call, proving nothing was queued
            client.send_sensor("TG0", "/g0").unwrap()
        })
        .await
        .unwrap();

        assert_eq!(status, 0);
        let snap = service.snapshot();
        assert_eq!(snap.zones[0].name, "GPU");
        assert_eq!(snap.zones[0].num_sensors(), 1);

        stop.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_parcel_gets_bad_value() {
        let dir = TempDir::new().unwrap();
        let service = ThermalApiService::new(Session::default());
        let (path, stop, handle) = start(&dir, service.clone());

        let mut stream = UnixStream::connect(&path).await.unwrap();
        let header = TransactionHeader {
            code: Opcode::Zone.code(),
            flags: 0,
            len: (MAX_PARCEL_SIZE + 1) as u32,
        };
        stream.write_all(&header.encode()).await.unwrap();

        let mut raw = [0u8; REPLY_HEADER_SIZE];
        stream.read_exact(&mut raw).await.unwrap();
        let reply = ReplyHeader::decode(&raw).unwrap();
        assert_eq!(reply.status, TransportStatus::BadValue.raw());
        assert_eq!(reply.len, 0);
        assert!(service.snapshot().zones.is_empty());

        stop.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_frame_oneway_then_eof() {
        let header = TransactionHeader { code: 3, flags: FLAG_ONEWAY, len: 0 };
        let mut cursor = std::io::Cursor::new(header.encode().to_vec());
        let (decoded, parcel) = read_frame(&mut cursor).await.unwrap().unwrap();
        assert!(decoded.is_oneway());
        assert!(parcel.is_empty());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_partial_header_is_error() {
        let header = TransactionHeader { code: 2, flags: 0, len: 4 };
        let mut cursor = std::io::Cursor::new(header.encode()[..5].to_vec());
        assert!(read_frame(&mut cursor).await.is_err());
    }

    #[test]
    fn test_refuses_symlinked_socket_path() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("real");
        std::fs::write(&target, b"").unwrap();
        let link = dir.path().join("tb.sock");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let err = rt.block_on(async { bind_listener(link.to_str().unwrap()).map(|_| ()) });
        assert_eq!(err.unwrap_err().kind(), std::io::ErrorKind::PermissionDenied);
        assert!(target.exists());
    }
}
