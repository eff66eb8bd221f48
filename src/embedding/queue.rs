//! Background batch-embedding pipeline: requests are enqueued and drained
//! by a worker loop so `store()` never blocks on a slow embedder.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::Result;

use super::Embedder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingStatus {
    Pending,
    Processing,
    Completed,
    Failed(String),
}

pub struct EmbeddingRequest {
    pub content_hash: String,
    pub text: String,
}

/// Bounded async queue feeding a pool of embedding workers.
pub struct EmbeddingQueue {
    sender: async_channel::Sender<EmbeddingRequest>,
    receiver: async_channel::Receiver<EmbeddingRequest>,
    statuses: Arc<RwLock<std::collections::HashMap<String, EmbeddingStatus>>>,
}

impl EmbeddingQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = async_channel::bounded(capacity.max(1));
        Self { sender, receiver, statuses: Arc::new(RwLock::new(std::collections::HashMap::new())) }
    }

    pub async fn enqueue(&self, request: EmbeddingRequest) -> Result<()> {
        self.statuses.write().await.insert(request.content_hash.clone(), EmbeddingStatus::Pending);
        let _ = self.sender.send(request).await;
        Ok(())
    }

    pub async fn status(&self, content_hash: &str) -> Option<EmbeddingStatus> {
        self.statuses.read().await.get(content_hash).cloned()
    }

    /// Run the worker loop until the channel is closed. `on_embedded` is
    /// invoked with the request and its resulting vector on success.
    pub async fn run_worker<F, Fut>(&self, embedder: Arc<dyn Embedder>, on_embedded: F)
    where
        F: Fn(String, Vec<f32>) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = ()> + Send,
    {
        while let Ok(request) = self.receiver.recv().await {
            self.statuses.write().await.insert(request.content_hash.clone(), EmbeddingStatus::Processing);
            match embedder.embed(&request.text).await {
                Ok(vector) => {
                    self.statuses
                        .write()
                        .await
                        .insert(request.content_hash.clone(), EmbeddingStatus::Completed);
                    on_embedded(request.content_hash, vector).await;
                }
                Err(e) => {
                    tracing::warn!(hash = %request.content_hash, error = %e, "embedding failed");
                    self.statuses
                        .write()
                        .await
                        .insert(request.content_hash, EmbeddingStatus::Failed(e.to_string()));
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    #[tokio::test]
    async fn enqueue_sets_pending_status() {
        let queue = EmbeddingQueue::new(8);
        queue
            .enqueue(EmbeddingRequest { content_hash: "abc".to_string(), text: "hi".to_string() })
            .await
            .unwrap();
        assert_eq!(queue.status("abc").await, Some(EmbeddingStatus::Pending));
    }

    #[tokio::test]
    async fn worker_completes_request() {
        let queue = Arc::new(EmbeddingQueue::new(8));
        queue
            .enqueue(EmbeddingRequest { content_hash: "abc".to_string(), text: "hi".to_string() })
            .await
            .unwrap();
        queue.sender.close();

        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(16));
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        queue
            .run_worker(embedder, move |hash, vector| {
                let seen = seen_clone.clone();
                async move {
                    seen.lock().await.push((hash, vector));
                }
            })
            .await;

        assert_eq!(queue.status("abc").await, Some(EmbeddingStatus::Completed));
        assert_eq!(seen.lock().await.len(), 1);
    }
}
