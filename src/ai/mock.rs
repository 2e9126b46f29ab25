use std::{ops::Range, time::Duration};

use rand::Rng;
use tracing::debug;

use super::{GenerateError, GeneratedImage, ImageInput, TryOnGenerator};

/// Development stand-in: waits a little, then hands the person image back.
pub struct MockGenerator {
    delay_ms: Range<u64>,
}

impl MockGenerator {
    pub fn with_delay(delay_ms: Range<u64>) -> Self {
        Self { delay_ms }
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::with_delay(2000..5000)
    }
}

#[async_trait::async_trait]
impl TryOnGenerator for MockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        person: &ImageInput,
        _garment: &ImageInput,
    ) -> Result<GeneratedImage, GenerateError> {
        let delay = if self.delay_ms.is_empty() {
            0
        } else {
            rand::thread_rng().gen_range(self.delay_ms.clone())
        };
        debug!(delay_ms = delay, "mock generation");
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(GeneratedImage {
            bytes: person.bytes.clone(),
            content_type: person.content_type.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn returns_person_image() {
        let gen = MockGenerator::with_delay(0..0);
        let person = ImageInput {
            bytes: Bytes::from_static(b"person"),
            content_type: "image/png".into(),
        };
        let garment = ImageInput {
            bytes: Bytes::from_static(b"garment"),
            content_type: "image/jpeg".into(),
        };
        let out = gen.generate(&person, &garment).await.unwrap();
        assert_eq!(out.bytes, person.bytes);
        assert_eq!(out.content_type, "image/png");
    }
}
