//! Inbound stdio transport: newline-delimited JSON-RPC on a reader/writer
//! pair (stdin/stdout in the binary).

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use switchyard_rpc::Dispatcher;

/// Serve `dispatcher` until EOF or `shutdown`. Lines are handled in order;
/// each response is written as one line, notifications write nothing.
pub async fn serve_stdio<R, W>(
    dispatcher: &Dispatcher,
    reader: R,
    mut writer: W,
    shutdown: CancellationToken,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    info!("serving JSON-RPC over stdio");
    loop {
        let line = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("stdin closed");
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(out) = dispatcher.handle_text(line).await {
            let mut text = out.to_string();
            text.push('\n');
            writer.write_all(text.as_bytes()).await?;
            writer.flush().await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use switchyard_rpc::RpcContext;
    use switchyard_settings::{ConfigHandle, GatewayConfig};
    use switchyard_upstream::{DefaultAdapterFactory, UpstreamRegistry};

    fn dispatcher() -> Dispatcher {
        let registry = UpstreamRegistry::new(
            ConfigHandle::new(GatewayConfig::default()),
            Arc::new(DefaultAdapterFactory::new("test")),
        );
        Dispatcher::new(RpcContext::new(registry))
    }

    async fn run(input: &str) -> Vec<serde_json::Value> {
        let d = dispatcher();
        let mut out = Vec::new();
        serve_stdio(&d, input.as_bytes(), &mut out, CancellationToken::new())
            .await
            .unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn one_line_per_response_in_order() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            "\n",
        );
        let out = run(input).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["id"], 1);
        assert_eq!(out[1]["id"], 2);
    }

    #[tokio::test]
    async fn garbage_line_yields_parse_error() {
        let out = run("not json\n").await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["error"]["code"], -32_700);
        assert!(out[0]["id"].is_null());
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_reading() {
        let d = dispatcher();
        let token = CancellationToken::new();
        token.cancel();
        let mut out = Vec::new();
        serve_stdio(&d, &b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n"[..], &mut out, token)
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
