// JSON-lines method-call server
//
// One request per input line: {"id": 1, "method": "write", "args": {...}}.
// Output lines are either responses ({"id", "result"} or {"id", "error"}) or
// event records exactly as `Event::to_record` renders them. A response is
// never written before the events its operation published.

use anyhow::Result;
use btprint_core::{MethodCall, PrinterManager, Subscription};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

async fn emit<W>(output: &mut W, line: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = serde_json::to_vec(line)?;
    encoded.push(b'\n');
    output.write_all(&encoded).await?;
    output.flush().await?;
    Ok(())
}

async fn emit_delivered<W>(output: &mut W, subscription: &mut Subscription) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = subscription.try_recv() {
        emit(output, &event.to_record()).await?;
    }
    Ok(())
}

fn error_response(id: Value, message: String) -> Value {
    json!({ "id": id, "error": message })
}

async fn respond(manager: PrinterManager, id: Value, call: MethodCall) -> Value {
    let name = call.name();
    match call.dispatch(&manager).await {
        Ok(result) => json!({ "id": id, "result": result }),
        Err(e) => {
            debug!("{} failed: {}", name, e);
            error_response(id, e.to_string())
        }
    }
}

/// Parse one request line into its id and call
fn parse_line(line: &str) -> std::result::Result<(Value, MethodCall), Value> {
    let request: Value = serde_json::from_str(line)
        .map_err(|e| error_response(Value::Null, format!("Invalid JSON: {}", e)))?;
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    match MethodCall::from_request(request) {
        Ok(call) => Ok((id, call)),
        Err(e) => Err(error_response(id, e.to_string())),
    }
}

/// Serve requests from `input` until it ends and every call has answered
pub async fn serve<R, W>(manager: &PrinterManager, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut subscription = manager.subscribe()?;
    let mut lines = input.lines();
    let mut pending = FuturesUnordered::new();
    let mut input_open = true;
    info!("Serving method calls");

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match parse_line(&line) {
                    Ok((id, call)) => pending.push(respond(manager.clone(), id, call)),
                    Err(response) => emit(&mut output, &response).await?,
                },
                None => {
                    debug!("Input closed, {} call(s) in flight", pending.len());
                    input_open = false;
                }
            },
            Some(response) = pending.next(), if !pending.is_empty() => {
                emit_delivered(&mut output, &mut subscription).await?;
                emit(&mut output, &response).await?;
            },
            Some(event) = subscription.next() => {
                emit(&mut output, &event.to_record()).await?;
            },
            else => break,
        }
        if !input_open && pending.is_empty() {
            break;
        }
    }

    manager.flush_events().await;
    emit_delivered(&mut output, &mut subscription).await?;
    Ok(())
}
