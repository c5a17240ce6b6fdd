//! System V message queue transport
//!
//! This is the queue the backend creates at start-up. Every participant
//! derives the same key from a shared path with `ftok`, then opens the queue
//! with read/write access for all local users.

use std::{
    ffi::CString,
    io,
    mem::size_of,
    os::unix::ffi::OsStrExt,
    path::Path,
};

use async_trait::async_trait;
use libc::{c_int, c_long, c_void, key_t};
use tracing::{debug, trace};

use super::{MAX_MESSAGE_SIZE, MessageType, Transport, check_size};
use crate::{IpcError, Result};

/// Access mode for a newly created queue: read/write for everyone
const QUEUE_MODE: c_int = 0o666;

/// Key identifying a System V message queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueKey(key_t);

impl QueueKey {
    /// Derive the key from an existing path and a single-byte discriminator.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::InvalidQueueKey`] if the discriminator is not a
    /// non-NUL ASCII character, the path contains a NUL byte, or `ftok`
    /// fails (usually because the path does not exist).
    pub fn from_path(path: &Path, project_id: char) -> Result<Self> {
        let id = u8::try_from(u32::from(project_id))
            .ok()
            .filter(|b| *b != 0 && b.is_ascii())
            .ok_or_else(|| {
                IpcError::InvalidQueueKey(format!(
                    "project id {project_id:?} must be a non-NUL ASCII character"
                ))
            })?;

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            IpcError::InvalidQueueKey(format!("path contains NUL byte: {}", path.display()))
        })?;

        // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
        let key = unsafe { libc::ftok(c_path.as_ptr(), c_int::from(id)) };
        if key == -1 {
            return Err(IpcError::InvalidQueueKey(format!(
                "ftok({}, {project_id:?}): {}",
                path.display(),
                io::Error::last_os_error()
            )));
        }

        Ok(Self(key))
    }

    /// A key that always creates a new, unshared queue
    #[must_use]
    pub const fn private() -> Self {
        Self(libc::IPC_PRIVATE)
    }

    #[must_use]
    pub const fn get(self) -> key_t {
        self.0
    }
}

/// Handle to an open System V message queue
#[derive(Debug)]
pub struct SysvQueue {
    id: c_int,
    max_message_size: usize,
}

impl SysvQueue {
    /// Open the queue for `key`, creating it with mode `0666` if needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `msgget` fails.
    pub fn open(key: QueueKey) -> io::Result<Self> {
        // SAFETY: msgget takes no pointers.
        let id = unsafe { libc::msgget(key.get(), libc::IPC_CREAT | QUEUE_MODE) };
        if id == -1 {
            return Err(io::Error::last_os_error());
        }

        debug!(key = key.get(), id, "Opened message queue");
        Ok(Self {
            id,
            max_message_size: MAX_MESSAGE_SIZE,
        })
    }

    #[must_use]
    pub const fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Destroy the queue for every participant.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `msgctl` fails.
    pub fn remove(self) -> io::Result<()> {
        // SAFETY: IPC_RMID ignores the buffer argument.
        let rc = unsafe { libc::msgctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Buffer laid out as `struct msgbuf { long mtype; char mtext[]; }`
    fn buffer(&self) -> Vec<c_long> {
        vec![0; 1 + self.max_message_size.div_ceil(size_of::<c_long>())]
    }
}

#[async_trait]
#[allow(clippy::cast_possible_truncation)]
impl Transport for SysvQueue {
    async fn send(&self, tag: MessageType, bytes: &[u8]) -> Result<()> {
        check_size(tag, bytes, self.max_message_size)?;

        let mut buf = self.buffer();
        buf[0] = tag.get() as c_long;
        // SAFETY: buf holds one c_long followed by at least max_message_size
        // bytes, and bytes.len() <= max_message_size was checked above.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                buf.as_mut_ptr().add(1).cast::<u8>(),
                bytes.len(),
            );
        }

        // SAFETY: buf is a valid msgbuf for bytes.len() bytes of text.
        let rc = unsafe {
            libc::msgsnd(
                self.id,
                buf.as_ptr().cast::<c_void>(),
                bytes.len(),
                libc::IPC_NOWAIT,
            )
        };
        if rc == -1 {
            return Err(IpcError::Send {
                tag,
                len: bytes.len(),
                source: io::Error::last_os_error(),
            });
        }

        trace!(%tag, len = bytes.len(), "msgsnd");
        Ok(())
    }

    async fn try_receive(&self, tag: MessageType) -> Result<Option<Vec<u8>>> {
        let mut buf = self.buffer();

        // MSG_NOERROR truncates oversized records instead of failing.
        // SAFETY: buf has room for one c_long plus max_message_size bytes.
        let received = unsafe {
            libc::msgrcv(
                self.id,
                buf.as_mut_ptr().cast::<c_void>(),
                self.max_message_size,
                tag.get() as c_long,
                libc::IPC_NOWAIT | libc::MSG_NOERROR,
            )
        };

        if received < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOMSG) {
                return Ok(None);
            }
            return Err(IpcError::Receive { tag, source: err });
        }

        let len = usize::try_from(received).unwrap_or(0);
        let mut bytes = vec![0u8; len];
        // SAFETY: the kernel wrote `len` bytes of text after the mtype field.
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr().add(1).cast::<u8>(), bytes.as_mut_ptr(), len);
        }

        trace!(%tag, len, "msgrcv");
        Ok(Some(bytes))
    }

    fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_rejects_non_ascii_project_id() {
        let err = QueueKey::from_path(Path::new("/"), 'é').unwrap_err();
        assert!(matches!(err, IpcError::InvalidQueueKey(_)));

        let err = QueueKey::from_path(Path::new("/"), '\0').unwrap_err();
        assert!(matches!(err, IpcError::InvalidQueueKey(_)));
    }

    #[test]
    fn test_key_requires_existing_path() {
        let err = QueueKey::from_path(Path::new("/nonexistent/webipc"), 'T').unwrap_err();
        assert!(matches!(err, IpcError::InvalidQueueKey(_)));
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = QueueKey::from_path(Path::new("/"), 'T').unwrap();
        let b = QueueKey::from_path(Path::new("/"), 'T').unwrap();
        let c = QueueKey::from_path(Path::new("/"), 'U').unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore)]
    async fn test_private_queue_round_trip() {
        let queue = SysvQueue::open(QueueKey::private()).unwrap();

        assert_eq!(queue.try_receive(MessageType::RESPONSE).await.unwrap(), None);

        queue.send(MessageType::REQUEST, b"getStatus").await.unwrap();
        queue.send(MessageType::RESPONSE, b"ok").await.unwrap();

        assert_eq!(
            queue.try_receive(MessageType::RESPONSE).await.unwrap(),
            Some(b"ok".to_vec())
        );
        assert_eq!(
            queue.try_receive(MessageType::REQUEST).await.unwrap(),
            Some(b"getStatus".to_vec())
        );

        let err = queue
            .send(MessageType::REQUEST, &[0; MAX_MESSAGE_SIZE + 1])
            .await
            .unwrap_err();
        assert!(matches!(err, IpcError::Send { .. }));

        queue.remove().unwrap();
    }
}
