//! MCP server exposing `speak` over stdio
//!
//! stdout carries the protocol, so nothing here prints; logs go to stderr or
//! the log file.

use super::speak::{SpeakRequest, SpeakService};
use crate::SpeakerError;
use log::{error, info};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use std::sync::Arc;

const INSTRUCTIONS: &str = "Use the speak tool to read text aloud with Aivis Cloud TTS. \
Pass `text` for a single utterance or `speaks` for several segments, each with its own \
model_uuid, emotional_intensity and volume. The call returns once playback has finished.";

#[derive(Clone)]
pub struct SpeakerServer {
    service: Arc<SpeakService>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl SpeakerServer {
    pub fn new(service: Arc<SpeakService>) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Synthesize and play a single text, or several texts in order, using the Aivis Cloud TTS API"
    )]
    async fn speak(
        &self,
        Parameters(request): Parameters<SpeakRequest>,
    ) -> Result<CallToolResult, McpError> {
        let service = self.service.clone();
        let spoken = tokio::task::spawn_blocking(move || service.speak(&request))
            .await
            .map_err(|e| McpError::internal_error(format!("speech task failed: {}", e), None))?;

        let report = match spoken {
            Ok(report) => report,
            Err(e) => {
                error!("speak rejected: {}", e);
                return Ok(CallToolResult::error(vec![Content::text(e.to_string())]));
            }
        };

        let summary = serde_json::to_string_pretty(&report)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        if report.success {
            Ok(CallToolResult::success(vec![Content::text(summary)]))
        } else {
            Ok(CallToolResult::error(vec![Content::text(summary)]))
        }
    }
}

#[tool_handler]
impl ServerHandler for SpeakerServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.to_string()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Serve MCP on stdin/stdout until the client disconnects
pub fn serve_stdio(service: Arc<SpeakService>) -> crate::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let running = SpeakerServer::new(service)
            .serve(rmcp::transport::stdio())
            .await
            .map_err(|e| SpeakerError::Other(format!("MCP handshake failed: {}", e)))?;
        info!("MCP server ready on stdio");

        let reason = running
            .waiting()
            .await
            .map_err(|e| SpeakerError::Other(format!("MCP server task failed: {}", e)))?;
        info!("MCP server stopped: {:?}", reason);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::{NoPlayer, PlaybackCoordinator};
    use crate::sequencer::SequencerOptions;
    use crate::synth::{AudioBlob, AudioFormat, Synthesizer, VoiceParams};
    use std::time::Duration;

    struct Silence;

    impl Synthesizer for Silence {
        fn synthesize(&self, _text: &str) -> crate::Result<AudioBlob> {
            Ok(AudioBlob::new(vec![0u8; 8], AudioFormat::Mp3))
        }
    }

    fn server() -> SpeakerServer {
        let coordinator = Arc::new(PlaybackCoordinator::new(Box::new(NoPlayer)));
        let options = SequencerOptions {
            split_pause: Duration::ZERO,
            play: false,
            ..SequencerOptions::default()
        };
        let service = SpeakService::new(VoiceParams::default(), coordinator, options, |_| {
            Box::new(Silence) as Box<dyn Synthesizer>
        });
        SpeakerServer::new(Arc::new(service))
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn test_advertises_speak_tool() {
        let server = server();
        let info = server.get_info();
        assert!(info.capabilities.tools.is_some());

        let tools = server.tool_router.list_all();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "speak");
        let properties = tools[0].input_schema.get("properties").unwrap();
        assert!(properties.get("text").is_some());
        assert!(properties.get("speaks").is_some());
    }

    #[test]
    fn test_speak_returns_summary() {
        let server = server();
        let request = SpeakRequest {
            text: Some("こんにちは".to_string()),
            ..SpeakRequest::default()
        };
        let result = block_on(server.speak(Parameters(request))).unwrap();
        assert_eq!(result.is_error, Some(false));
    }

    #[test]
    fn test_empty_request_is_tool_error() {
        let server = server();
        let result = block_on(server.speak(Parameters(SpeakRequest::default()))).unwrap();
        assert_eq!(result.is_error, Some(true));
    }
}
