//! Minimal RESP2 codec for the distributed cache.

use futures_util::future::BoxFuture;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::cache::CacheError;

/// Largest bulk string accepted from the server.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// A decoded server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<Reply>>),
}

/// Encode a command as an array of bulk strings.
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

async fn read_line<R>(reader: &mut R) -> Result<String, CacheError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(CacheError::Protocol("connection closed".into()));
    }
    if !line.ends_with("\r\n") {
        return Err(CacheError::Protocol("unterminated line".into()));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

fn parse_len(raw: &str) -> Result<i64, CacheError> {
    raw.parse()
        .map_err(|_| CacheError::Protocol(format!("invalid length `{raw}`")))
}

/// Read one reply, recursing into arrays.
pub fn read_reply<'a, R>(reader: &'a mut R) -> BoxFuture<'a, Result<Reply, CacheError>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        let line = read_line(reader).await?;
        let mut chars = line.chars();
        let kind = chars.next();
        let rest = chars.as_str();
        match kind {
            Some('+') => Ok(Reply::Status(rest.to_string())),
            Some('-') => Ok(Reply::Error(rest.to_string())),
            Some(':') => Ok(Reply::Integer(parse_len(rest)?)),
            Some('$') => {
                let len = parse_len(rest)?;
                if len < 0 {
                    return Ok(Reply::Bulk(None));
                }
                let len = len as usize;
                if len > MAX_BULK_LEN {
                    return Err(CacheError::Protocol(format!("bulk of {len} bytes")));
                }
                let mut buf = vec![0u8; len + 2];
                reader.read_exact(&mut buf).await?;
                if &buf[len..] != b"\r\n" {
                    return Err(CacheError::Protocol("bulk not terminated".into()));
                }
                buf.truncate(len);
                Ok(Reply::Bulk(Some(buf)))
            }
            Some('*') => {
                let len = parse_len(rest)?;
                if len < 0 {
                    return Ok(Reply::Array(None));
                }
                let mut items = Vec::with_capacity(len.min(1024) as usize);
                for _ in 0..len {
                    items.push(read_reply(reader).await?);
                }
                Ok(Reply::Array(Some(items)))
            }
            _ => Err(CacheError::Protocol(format!("unexpected reply `{line}`"))),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn decode(raw: &[u8]) -> Result<Reply, CacheError> {
        let mut reader = BufReader::new(raw);
        read_reply(&mut reader).await
    }

    #[test]
    fn encodes_bulk_array() {
        assert_eq!(
            encode_command(&[b"GET", b"k1"]),
            b"*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n".to_vec()
        );
    }

    #[tokio::test]
    async fn decodes_replies() {
        assert_eq!(decode(b"+PONG\r\n").await.unwrap(), Reply::Status("PONG".into()));
        assert_eq!(decode(b":1\r\n").await.unwrap(), Reply::Integer(1));
        assert_eq!(decode(b"$-1\r\n").await.unwrap(), Reply::Bulk(None));
        assert_eq!(
            decode(b"$5\r\nhe\r\no\r\n").await.unwrap(),
            Reply::Bulk(Some(b"he\r\no".to_vec()))
        );
        assert_eq!(
            decode(b"*2\r\n:1\r\n-ERR no\r\n").await.unwrap(),
            Reply::Array(Some(vec![Reply::Integer(1), Reply::Error("ERR no".into())]))
        );
    }

    #[tokio::test]
    async fn rejects_garbage() {
        assert!(matches!(decode(b"?x\r\n").await, Err(CacheError::Protocol(_))));
        assert!(matches!(decode(b"").await, Err(CacheError::Protocol(_))));
        assert!(matches!(decode(b"$3\r\nabcd\r\n").await, Err(CacheError::Protocol(_))));
    }
}
