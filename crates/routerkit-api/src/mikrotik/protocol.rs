// RouterOS binary API framing.
//
// A sentence is a run of length-prefixed words closed by an empty word.
// Replies arrive as `!re` records followed by `!done`; `!trap` reports a
// command failure and is itself followed by `!done`; `!fatal` means the
// router is closing the socket.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::Error;

/// Attribute words of one sentence (`=key=value`).
pub type Attrs = HashMap<String, String>;

/// Decoded reply to one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// One entry per `!re` sentence.
    pub records: Vec<Attrs>,
    /// Attributes carried by `!done` (e.g. `ret` after an `add`).
    pub done: Attrs,
}

impl Reply {
    /// `!done` carrying `=ret=<id>`, as sent after `add`.
    pub fn with_ret(id: impl Into<String>) -> Self {
        let mut done = Attrs::new();
        done.insert("ret".into(), id.into());
        Self {
            records: Vec::new(),
            done,
        }
    }

    pub fn with_records(records: Vec<Attrs>) -> Self {
        Self {
            records,
            done: Attrs::new(),
        }
    }

    pub fn ret(&self) -> Option<&str> {
        self.done.get("ret").map(String::as_str)
    }
}

/// `=key=value` attribute word.
pub fn attr(key: &str, value: &str) -> String {
    format!("={key}={value}")
}

// ── Length prefix ───────────────────────────────────────────────────

/// Longest word accepted from a router.
pub const MAX_WORD_LEN: usize = 16 * 1024 * 1024;

/// Encode a word length with the RouterOS variable-length prefix.
pub fn encode_length(len: u32) -> Vec<u8> {
    let [b0, b1, b2, b3] = len.to_be_bytes();
    if len < 0x80 {
        vec![b3]
    } else if len < 0x4000 {
        vec![b2 | 0x80, b3]
    } else if len < 0x0020_0000 {
        vec![b1 | 0xC0, b2, b3]
    } else if len < 0x1000_0000 {
        vec![b0 | 0xE0, b1, b2, b3]
    } else {
        vec![0xF0, b0, b1, b2, b3]
    }
}

/// Read one length prefix from `reader`.
pub async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<usize> {
    let first = reader.read_u8().await?;
    let (mask, extra) = match first {
        b if b & 0x80 == 0 => (0x7F, 0),
        b if b & 0xC0 == 0x80 => (0x3F, 1),
        b if b & 0xE0 == 0xC0 => (0x1F, 2),
        b if b & 0xF0 == 0xE0 => (0x0F, 3),
        0xF0 => (0x00, 4),
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("reserved length control byte {other:#04x}"),
            ));
        }
    };

    let mut value = u32::from(first & mask);
    for _ in 0..extra {
        value = (value << 8) | u32::from(reader.read_u8().await?);
    }
    usize::try_from(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

// ── Connection ──────────────────────────────────────────────────────

/// An API session over any byte stream (TCP in production, an in-memory
/// duplex in tests).
pub struct RouterOsConnection<S> {
    stream: S,
    target: String,
    timeout: Duration,
}

impl<S> RouterOsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            stream,
            target: target.into(),
            timeout,
        }
    }

    fn io_err(&self, err: &io::Error) -> Error {
        Error::Connection {
            target: self.target.clone(),
            reason: err.to_string(),
        }
    }

    fn timeout_err(&self) -> Error {
        Error::Timeout {
            target: self.target.clone(),
            timeout_secs: self.timeout.as_secs(),
        }
    }

    /// Run one command and collect its reply.
    ///
    /// A `!trap` becomes [`Error::Rejected`] with the trap message.
    pub async fn call(&mut self, path: &str, words: &[String]) -> Result<Reply, Error> {
        debug!(target = %self.target, "API {path}");
        let deadline = self.timeout;
        match timeout(deadline, self.exchange(path, words)).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_err()),
        }
    }

    async fn exchange(&mut self, path: &str, words: &[String]) -> Result<Reply, Error> {
        if let Err(e) = self.write_sentence(path, words).await {
            return Err(self.io_err(&e));
        }

        let mut reply = Reply::default();
        let mut trap: Option<String> = None;
        loop {
            let sentence = self.read_sentence().await?;
            let Some((kind, rest)) = sentence.split_first() else {
                continue;
            };
            trace!(kind = %kind, words = rest.len(), "sentence");
            let attrs = parse_attrs(rest);

            match kind.as_str() {
                "!re" => reply.records.push(attrs),
                "!trap" => {
                    trap = Some(
                        attrs
                            .get("message")
                            .cloned()
                            .unwrap_or_else(|| "trap".into()),
                    );
                }
                "!fatal" => {
                    let reason = rest.first().cloned().unwrap_or_else(|| "fatal".into());
                    return Err(Error::Connection {
                        target: self.target.clone(),
                        reason,
                    });
                }
                "!done" => {
                    reply.done = attrs;
                    break;
                }
                _ => {}
            }
        }

        match trap {
            Some(message) => Err(Error::rejected(path, message)),
            None => Ok(reply),
        }
    }

    /// Authenticate: plain `/login` (RouterOS 6.43+), or the MD5
    /// challenge-response when the router answers with `ret`.
    pub async fn login(&mut self, username: &str, password: &SecretString) -> Result<(), Error> {
        let reply = self
            .call(
                "/login",
                &[
                    attr("name", username),
                    attr("password", password.expose_secret()),
                ],
            )
            .await
            .map_err(login_failure)?;

        let Some(challenge) = reply.ret() else {
            debug!(target = %self.target, "RouterOS login accepted");
            return Ok(());
        };

        debug!(target = %self.target, "RouterOS answered with a challenge, using legacy login");
        let response = challenge_response(password.expose_secret(), challenge)?;
        self.call("/login", &[attr("name", username), attr("response", &response)])
            .await
            .map_err(login_failure)?;
        Ok(())
    }

    /// Close the write half; errors are ignored.
    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    async fn write_sentence(&mut self, path: &str, words: &[String]) -> io::Result<()> {
        let mut buf = Vec::new();
        for word in std::iter::once(path).chain(words.iter().map(String::as_str)) {
            let len = u32::try_from(word.len())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            buf.extend_from_slice(&encode_length(len));
            buf.extend_from_slice(word.as_bytes());
        }
        buf.push(0);
        self.stream.write_all(&buf).await?;
        self.stream.flush().await
    }

    async fn read_sentence(&mut self) -> Result<Vec<String>, Error> {
        let mut words = Vec::new();
        loop {
            let len = read_length(&mut self.stream).await.map_err(|e| self.io_err(&e))?;
            if len == 0 {
                return Ok(words);
            }
            if len > MAX_WORD_LEN {
                return Err(Error::parse(
                    self.target.clone(),
                    format!("word of {len} bytes exceeds the {MAX_WORD_LEN} byte limit"),
                ));
            }
            let mut buf = vec![0u8; len];
            self.stream.read_exact(&mut buf).await.map_err(|e| self.io_err(&e))?;
            words.push(String::from_utf8_lossy(&buf).into_owned());
        }
    }
}

fn parse_attrs(words: &[String]) -> Attrs {
    words
        .iter()
        .filter_map(|w| w.strip_prefix('='))
        .filter_map(|w| w.split_once('='))
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}

fn login_failure(err: Error) -> Error {
    match err {
        Error::Rejected { message, .. } => Error::Authentication { message },
        other => other,
    }
}

/// `00` + hex(md5(0x00 + password + challenge)).
fn challenge_response(password: &str, challenge_hex: &str) -> Result<String, Error> {
    let challenge =
        hex::decode(challenge_hex).map_err(|e| Error::parse("/login", format!("bad challenge: {e}")))?;
    let mut data = Vec::with_capacity(1 + password.len() + challenge.len());
    data.push(0u8);
    data.extend_from_slice(password.as_bytes());
    data.extend_from_slice(&challenge);
    Ok(format!("00{}", hex::encode(md5::compute(&data).0)))
}
