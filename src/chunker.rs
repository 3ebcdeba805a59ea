//! Content-defined chunking: split a byte stream into variable-size chunks
//! using a sentinel-search heuristic with min/max clamps.

use tokio::io::{AsyncRead, AsyncReadExt};

pub const MIN_CHUNK_SIZE: usize = 4096;
pub const MAX_CHUNK_SIZE: usize = 1_048_576;
pub const SENTINEL: [u8; 2] = [0x42, 0xFE];
const READ_SIZE: usize = 4 * 1024 * 1024;

/// Splits `reader` into chunks, invoking `on_chunk` with each chunk's bytes
/// in order. Concatenating every chunk reproduces the input exactly.
pub async fn chunk_stream<R, F>(mut reader: R, mut on_chunk: F) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(Vec<u8>),
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut read_buf = vec![0u8; READ_SIZE];
    let mut eof = false;

    loop {
        if !eof {
            let n = reader.read(&mut read_buf).await?;
            if n == 0 {
                eof = true;
            } else {
                buffer.extend_from_slice(&read_buf[..n]);
            }
        }

        if let Some(pos) = find_sentinel(&buffer) {
            let cut = pos + SENTINEL.len();
            on_chunk(buffer.drain(..cut).collect());
            continue;
        }

        if buffer.len() >= MAX_CHUNK_SIZE {
            on_chunk(buffer.drain(..MAX_CHUNK_SIZE).collect());
            continue;
        }

        if eof {
            if !buffer.is_empty() {
                on_chunk(std::mem::take(&mut buffer));
            }
            return Ok(());
        }
    }
}

/// Synchronous counterpart to [`chunk_stream`] for blocking readers. The
/// ingestion worker runs this inside `tokio::task::spawn_blocking` so the
/// CPU-bound sentinel scan never runs on the async executor.
pub fn chunk_reader<R, F>(mut reader: R, mut on_chunk: F) -> std::io::Result<()>
where
    R: std::io::Read,
    F: FnMut(Vec<u8>) -> std::io::Result<()>,
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut read_buf = vec![0u8; READ_SIZE];
    let mut eof = false;

    loop {
        if !eof {
            let n = reader.read(&mut read_buf)?;
            if n == 0 {
                eof = true;
            } else {
                buffer.extend_from_slice(&read_buf[..n]);
            }
        }

        if let Some(pos) = find_sentinel(&buffer) {
            let cut = pos + SENTINEL.len();
            on_chunk(buffer.drain(..cut).collect())?;
            continue;
        }

        if buffer.len() >= MAX_CHUNK_SIZE {
            on_chunk(buffer.drain(..MAX_CHUNK_SIZE).collect())?;
            continue;
        }

        if eof {
            if !buffer.is_empty() {
                on_chunk(std::mem::take(&mut buffer))?;
            }
            return Ok(());
        }
    }
}

/// Finds the sentinel starting the search at `MIN_CHUNK_SIZE`, returning the
/// offset of its first byte.
fn find_sentinel(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < MIN_CHUNK_SIZE + SENTINEL.len() {
        return None;
    }
    buffer[MIN_CHUNK_SIZE..]
        .windows(SENTINEL.len())
        .position(|w| w == SENTINEL)
        .map(|p| p + MIN_CHUNK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn collect(input: Vec<u8>) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        chunk_stream(Cursor::new(input), |c| chunks.push(c))
            .await
            .unwrap();
        chunks
    }

    #[tokio::test]
    async fn tiny_input_is_one_chunk() {
        let chunks = collect(b"hello".to_vec()).await;
        assert_eq!(chunks, vec![b"hello".to_vec()]);
    }

    #[tokio::test]
    async fn splits_on_sentinel() {
        let mut input = vec![0x41u8; 5000];
        input.extend_from_slice(&SENTINEL);
        input.extend(vec![0x42u8; 5000]);
        let chunks = collect(input.clone()).await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 5002);
        assert_eq!(chunks[1].len(), 5000);
        assert_eq!(chunks.concat(), input);
    }

    #[tokio::test]
    async fn clamps_at_max_size_without_sentinel() {
        let input = vec![0u8; MAX_CHUNK_SIZE * 3];
        let chunks = collect(input.clone()).await;
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert_eq!(c.len(), MAX_CHUNK_SIZE);
        }
        assert_eq!(chunks.concat(), input);
    }

    #[test]
    fn blocking_reader_matches_async_stream() {
        let mut input = vec![0x41u8; 6000];
        input.extend_from_slice(&SENTINEL);
        input.extend(vec![0x99u8; MAX_CHUNK_SIZE * 2]);

        let mut blocking_chunks = Vec::new();
        chunk_reader(Cursor::new(input.clone()), |c| {
            blocking_chunks.push(c);
            Ok(())
        })
        .unwrap();

        let async_chunks = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(collect(input));

        assert_eq!(blocking_chunks, async_chunks);
    }

    #[tokio::test]
    async fn deterministic() {
        let input = vec![7u8; 200_000];
        let a = collect(input.clone()).await;
        let b = collect(input).await;
        assert_eq!(a, b);
    }
}
