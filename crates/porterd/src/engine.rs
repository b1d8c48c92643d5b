use image::RgbImage;
use porter_core::{AnalyzerError, DetectedFace, FaceAnalyzer};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the inference thread.
enum EngineRequest {
    Analyze {
        image: RgbImage,
        reply: oneshot::Sender<Result<Vec<DetectedFace>, EngineError>>,
    },
}

/// Clone-safe handle to the inference thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Detect and encode every face in a frame.
    pub async fn analyze(&self, image: RgbImage) -> Result<Vec<DetectedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the inference engine on a dedicated OS thread.
///
/// ONNX inference is CPU-bound, so requests funnel through one worker
/// that owns the analyzer instead of blocking runtime workers.
pub fn spawn_engine(mut analyzer: Box<dyn FaceAnalyzer + Send>) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("porter-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze { image, reply } => {
                        let result = analyzer.analyze(&image).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}
