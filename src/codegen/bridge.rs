use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{error, info, warn};

use crate::codegen::artifact::persist_artifact;
use crate::codegen::protocol::{classify_frame, StatusEvent};
use crate::codegen::session::{JobRequest, SessionSlot};
use crate::config::CONFIG;
use crate::db::models::Feature;
use crate::entitlements::meter;
use crate::handlers::replies::{retract_notice, send_quota_exceeded, send_wait_notice};
use crate::state::AppState;

type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Hand a generation job to the user's session, opening one if none is
/// live. The session map guarantees a single open connection per user; a
/// second request while one is in flight is queued on the same session.
pub async fn submit_job(bot: &Bot, state: &AppState, user_id: i64, job: JobRequest) -> Result<()> {
    let chat_id = job.chat_id;
    let sender = match state.sessions.acquire(user_id) {
        SessionSlot::Existing(sender) => sender,
        SessionSlot::New(sender, receiver) => {
            let bot = bot.clone();
            let state = state.clone();
            tokio::spawn(async move {
                run_session(bot, state, user_id, chat_id, receiver).await;
            });
            sender
        }
    };

    if let Err(err) = sender.try_send(job) {
        match err {
            mpsc::error::TrySendError::Full(_) => {
                bot.send_message(
                    chat_id,
                    "⚠️ CodeMorph is still working on your previous request. \
                     Please wait for it to finish.",
                )
                .await?;
            }
            mpsc::error::TrySendError::Closed(_) => {
                // The session ended between acquire and send; the next
                // request will open a fresh one.
                state.sessions.evict(user_id);
                return Err(anyhow!("Code generation session closed; please resubmit"));
            }
        }
    }

    Ok(())
}

/// Owns one websocket to the generation backend for one user. Jobs arrive
/// over the channel; the task ends (and evicts itself) on transport close,
/// error, or idle timeout, so a stale session can never hold its slot
/// forever.
async fn run_session(
    bot: Bot,
    state: AppState,
    user_id: i64,
    notify_chat: ChatId,
    mut jobs: mpsc::Receiver<JobRequest>,
) {
    let idle = Duration::from_secs(CONFIG.ws_idle_timeout_secs);

    let mut connection = match connect_backend().await {
        Ok(connection) => connection,
        Err(err) => {
            error!(user_id, "Failed to connect to code generation backend: {err}");
            let _ = bot
                .send_message(
                    notify_chat,
                    "❌ CodeMorph is unavailable right now. Please try again later.",
                )
                .await;
            let orphaned = drain_pending(&mut jobs);
            state.sessions.evict(user_id);
            for chat_id in orphaned.into_iter().filter(|chat| *chat != notify_chat) {
                notify_job_failed(&bot, chat_id).await;
            }
            return;
        }
    };
    info!(user_id, "Code generation session connected");

    loop {
        let job = match timeout(idle, jobs.recv()).await {
            Ok(Some(job)) => job,
            // Channel closed or nothing queued for the whole idle window:
            // free the slot.
            Ok(None) | Err(_) => break,
        };

        let chat_id = job.chat_id;
        match run_job(&bot, &state, user_id, &mut connection, job, idle).await {
            Ok(JobOutcome::Completed) => {}
            Ok(JobOutcome::SessionDead) => break,
            Err(err) => {
                warn!(user_id, "Code generation job failed: {err}");
                notify_job_failed(&bot, chat_id).await;
                break;
            }
        }
    }

    let orphaned = drain_pending(&mut jobs);
    state.sessions.evict(user_id);
    for chat_id in orphaned {
        warn!(user_id, "Dropping queued job after session teardown");
        notify_job_failed(&bot, chat_id).await;
    }
    let _ = connection.close(None).await;
    info!(user_id, "Code generation session closed");
}

/// Close the queue and collect the chats of jobs that will never run.
/// Closing first also catches a job accepted in the window between the
/// session deciding to die and the map eviction; each orphaned chat gets
/// a failure notice instead of silence.
fn drain_pending(jobs: &mut mpsc::Receiver<JobRequest>) -> Vec<ChatId> {
    jobs.close();
    let mut chats = Vec::new();
    while let Ok(job) = jobs.try_recv() {
        chats.push(job.chat_id);
    }
    chats
}

enum JobOutcome {
    Completed,
    SessionDead,
}

async fn run_job(
    bot: &Bot,
    state: &AppState,
    user_id: i64,
    connection: &mut WsConnection,
    job: JobRequest,
    idle: Duration,
) -> Result<JobOutcome> {
    let chat_id = job.chat_id;
    let request_text = serde_json::to_string(&job.payload)?;
    connection.send(WsMessage::Text(request_text)).await?;

    let mut wait_notice: Option<MessageId> = None;
    let mut quota_consumed = false;

    loop {
        let frame = match timeout(idle, connection.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(err))) => {
                warn!(user_id, "Websocket error mid-job: {err}");
                retract_notice(bot, chat_id, wait_notice).await;
                notify_job_failed(bot, chat_id).await;
                return Ok(JobOutcome::SessionDead);
            }
            Ok(None) => {
                retract_notice(bot, chat_id, wait_notice).await;
                notify_job_failed(bot, chat_id).await;
                return Ok(JobOutcome::SessionDead);
            }
            Err(_) => {
                warn!(user_id, "Websocket idle timeout mid-job; evicting session");
                retract_notice(bot, chat_id, wait_notice).await;
                notify_job_failed(bot, chat_id).await;
                return Ok(JobOutcome::SessionDead);
            }
        };

        if frame.is_close() {
            retract_notice(bot, chat_id, wait_notice).await;
            notify_job_failed(bot, chat_id).await;
            return Ok(JobOutcome::SessionDead);
        }
        let WsMessage::Text(text) = frame else {
            continue;
        };

        match classify_frame(&text) {
            StatusEvent::Generating => {
                if quota_consumed {
                    continue;
                }
                // Quota is consumed when the backend confirms it started,
                // not at submission: a request that never reaches the
                // backend costs nothing, one that fails downstream still
                // counts.
                match meter::check_and_consume(
                    &state.db,
                    &state.entitlements,
                    user_id,
                    Feature::GenerateCode,
                )
                .await
                {
                    Ok(true) => {
                        quota_consumed = true;
                        wait_notice = send_wait_notice(bot, chat_id, Feature::GenerateCode).await;
                    }
                    Ok(false) => {
                        send_quota_exceeded(bot, chat_id, Feature::GenerateCode).await;
                        return Ok(JobOutcome::SessionDead);
                    }
                    Err(err) => {
                        error!(user_id, "Usage meter failed; denying job: {err}");
                        notify_job_failed(bot, chat_id).await;
                        return Ok(JobOutcome::SessionDead);
                    }
                }
            }
            StatusEvent::Complete { html: Some(html) } => {
                deliver_artifact(bot, chat_id, &html).await;
                retract_notice(bot, chat_id, wait_notice).await;
                return Ok(JobOutcome::Completed);
            }
            StatusEvent::Complete { html: None } => {
                warn!(user_id, "Backend reported completion without a document");
                retract_notice(bot, chat_id, wait_notice).await;
                notify_job_failed(bot, chat_id).await;
                return Ok(JobOutcome::Completed);
            }
            StatusEvent::Ignored => {}
        }
    }
}

async fn connect_backend() -> Result<WsConnection> {
    let base = CONFIG.ws_backend_url.trim_end_matches('/');
    if base.is_empty() {
        return Err(anyhow!("WS_BACKEND_URL is not configured"));
    }
    let url = format!("{base}/generate-code");

    let connect = timeout(
        Duration::from_secs(CONFIG.ws_connect_timeout_secs),
        connect_async(&url),
    )
    .await
    .map_err(|_| anyhow!("Timed out connecting to {url}"))?;

    let (connection, _) = connect?;
    Ok(connection)
}

async fn deliver_artifact(bot: &Bot, chat_id: ChatId, html: &str) {
    let path = match persist_artifact(Path::new(&CONFIG.generated_dir), chat_id.0, html).await {
        Ok(path) => path,
        Err(err) => {
            error!("Failed to persist generated document: {err}");
            notify_job_failed(bot, chat_id).await;
            return;
        }
    };

    if let Err(err) = bot.send_document(chat_id, InputFile::file(&path)).await {
        error!("Failed to send generated document: {err}");
        notify_job_failed(bot, chat_id).await;
        return;
    }
    if let Err(err) = bot
        .send_message(chat_id, "Code ready, Click to open in browser.")
        .await
    {
        warn!("Failed to send completion notice: {err}");
    }
}

async fn notify_job_failed(bot: &Bot, chat_id: ChatId) {
    let _ = bot
        .send_message(
            chat_id,
            "❌ CodeMorph couldn't finish this request. Please send your design again.",
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::protocol::GeneratePayload;

    fn job(chat_id: i64) -> JobRequest {
        JobRequest {
            chat_id: ChatId(chat_id),
            payload: GeneratePayload::create("data:image/png;base64,AAAA".to_string()),
        }
    }

    #[tokio::test]
    async fn teardown_drain_surfaces_every_queued_job() {
        let (tx, mut rx) = mpsc::channel(4);

        // One job dispatched, one still waiting when the session dies.
        tx.try_send(job(100)).unwrap();
        tx.try_send(job(200)).unwrap();
        let _dispatched = rx.recv().await.unwrap();

        let orphaned = drain_pending(&mut rx);
        assert_eq!(orphaned, vec![ChatId(200)]);
    }

    #[tokio::test]
    async fn drain_also_catches_a_job_accepted_during_teardown() {
        let (tx, mut rx) = mpsc::channel(4);

        // The sender is still live at this point, so a submission racing
        // the teardown can land in the buffer.
        tx.try_send(job(300)).unwrap();

        let orphaned = drain_pending(&mut rx);
        assert_eq!(orphaned, vec![ChatId(300)]);

        // After the drain the queue is closed: nothing can slip in
        // unnoticed anymore.
        assert!(tx.try_send(job(400)).is_err());
        assert!(drain_pending(&mut rx).is_empty());
    }
}
