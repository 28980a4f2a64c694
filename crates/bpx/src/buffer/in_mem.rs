//! 🧠 The buffer that lives entirely in RAM, gone the moment you blink.
//!
//! Same contract as the file buffer, minus the disk. Great for tests, great for
//! hosts that do not mind losing a partial batch on restart. ⚠️ Not durable.
//! If you deploy this to prod on purpose, please also deploy a therapist.

use async_trait::async_trait;

use super::{PayloadBuffer, as_record};
use crate::error::{BatchError, BatchResult};

/// 🧠 A `String` that pretends to be a file. `None` means "no buffer exists".
#[derive(Debug, Default)]
pub struct InMemoryBuffer {
    payload: Option<String>,
}

#[async_trait]
impl PayloadBuffer for InMemoryBuffer {
    async fn append(&mut self, body: &str) -> BatchResult<()> {
        self.payload
            .get_or_insert_with(String::new)
            .push_str(&as_record(body));
        Ok(())
    }

    async fn current_size(&self) -> BatchResult<u64> {
        Ok(self.payload.as_ref().map_or(0, |p| p.len() as u64))
    }

    async fn exists(&self) -> BatchResult<bool> {
        Ok(self.payload.is_some())
    }

    async fn read_all(&self) -> BatchResult<String> {
        self.payload.clone().ok_or(BatchError::BufferUnavailable)
    }

    async fn clear(&mut self) -> BatchResult<()> {
        self.payload = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_ram_keeps_the_same_promises_as_disk() -> anyhow::Result<()> {
        let mut the_buffer = InMemoryBuffer::default();
        assert_eq!(the_buffer.current_size().await?, 0);
        the_buffer.append("{\"a\":1}\n").await?;
        the_buffer.append("  {\"b\":2}").await?;
        assert_eq!(the_buffer.current_size().await?, 16);
        assert_eq!(the_buffer.read_all().await?, "{\"a\":1}\n{\"b\":2}\n");
        the_buffer.clear().await?;
        the_buffer.clear().await?;
        assert!(matches!(
            the_buffer.read_all().await,
            Err(BatchError::BufferUnavailable)
        ));
        Ok(())
    }
}
