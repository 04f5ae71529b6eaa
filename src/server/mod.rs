//! Web surface for the grader
//!
//! A thin shell around the coordinator:
//! - `POST /api/upload` - multipart notebook + question paper; everything is
//!   validated here so the grading core only ever sees well-formed input
//! - `GET /ws` - the single observer channel
//! - `GET /` - embedded single-page UI
//! - `GET /api/status`, `GET /metrics` - liveness and Prometheus text

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Multipart, State, WebSocketUpgrade,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::coordinator::{GradingJob, JobCoordinator, Notice};
use crate::metrics;
use crate::notebook::Notebook;

/// Application state shared by every route
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<JobCoordinator>,
}

/// Status response for the UI poll
#[derive(Serialize)]
pub struct StatusResponse {
    pub busy: bool,
}

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/ws", get(ws_handler))
        .route("/api/upload", post(upload_handler))
        .route("/api/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve the embedded UI page
async fn index_page() -> Html<&'static str> {
    Html(APP_HTML)
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        busy: state.coordinator.busy().await,
    })
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

/// Upgrade to the observer WebSocket.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| observer_connection(socket, state))
}

/// Pump coordinator notices to the observer until either side goes away.
///
/// A second simultaneous connection is told about the conflict and closed;
/// the registered observer is unaffected.
async fn observer_connection(mut socket: WebSocket, state: AppState) {
    let mut notices = match state.coordinator.register_observer().await {
        Ok(rx) => rx,
        Err(conflict) => {
            if let Ok(text) = serde_json::to_string(&conflict) {
                let _ = socket.send(Message::Text(text)).await;
            }
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    loop {
        tokio::select! {
            notice = notices.recv() => {
                // None means the coordinator replaced this observer.
                let Some(notice) = notice else { break };
                let Ok(text) = serde_json::to_string(&notice) else { continue };
                if socket.send(Message::Text(text)).await.is_err() {
                    debug!("Observer went away mid-send");
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // The observer never has anything to say; drain and ignore.
                    Some(Ok(_)) => continue,
                    _ => {
                        debug!("Observer disconnected");
                        break;
                    }
                }
            }
        }
    }
}

/// Accept one (notebook, question paper) pair and hand it to the coordinator.
///
/// Both parts are decoded and validated here - the core is only invoked with
/// a parsed notebook and extracted rubric text.
async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut notebook: Option<(String, String)> = None;
    let mut rubric: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("malformed upload: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "notebook" => {
                let filename = field
                    .file_name()
                    .unwrap_or("notebook.ipynb")
                    .to_string();
                let text = field.text().await.map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("notebook is not UTF-8 text: {}", e),
                    )
                })?;
                notebook = Some((filename, text));
            }
            "question_paper" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("question paper unreadable: {}", e),
                    )
                })?;
                rubric = Some(extract_rubric_text(&filename, &bytes)?);
            }
            other => debug!(field = %other, "Ignoring unknown upload field"),
        }
    }

    let (filename, json) = notebook.ok_or((
        StatusCode::BAD_REQUEST,
        "missing 'notebook' field".to_string(),
    ))?;
    let rubric = rubric.ok_or((
        StatusCode::BAD_REQUEST,
        "missing 'question_paper' field".to_string(),
    ))?;

    let parsed = Notebook::from_json(&json).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("invalid notebook JSON: {}", e),
        )
    })?;

    info!(filename = %filename, cells = parsed.cell_count(), "Submission accepted");

    if Arc::clone(&state.coordinator)
        .submit(GradingJob {
            filename,
            notebook: parsed,
            rubric,
        })
        .await
    {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err((
            StatusCode::CONFLICT,
            "a grading job is already in progress".to_string(),
        ))
    }
}

/// Rubric text from the uploaded question paper: PDFs go through text
/// extraction, anything else must already be UTF-8 text.
fn extract_rubric_text(
    filename: &str,
    bytes: &[u8],
) -> Result<String, (StatusCode, String)> {
    let is_pdf = filename.to_lowercase().ends_with(".pdf") || bytes.starts_with(b"%PDF");
    if is_pdf {
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
            warn!(filename = %filename, error = %e, "Rubric PDF extraction failed");
            (
                StatusCode::BAD_REQUEST,
                format!("could not extract text from PDF: {}", e),
            )
        })
    } else {
        String::from_utf8(bytes.to_vec()).map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                "question paper is neither PDF nor UTF-8 text".to_string(),
            )
        })
    }
}

/// Embedded UI page: upload, live log, grade tables, client-side file queue.
const APP_HTML: &str = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Cellgrader</title>
    <style>
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: #0a0a0a;
            color: #e0e0e0;
            min-height: 100vh;
            padding: 2rem;
        }
        .header {
            text-align: center;
            margin-bottom: 2rem;
            border-bottom: 1px solid #333;
            padding-bottom: 1rem;
        }
        .header h1 { color: #00ff88; font-size: 2rem; margin-bottom: 0.5rem; }
        .header p { color: #888; }
        .grid {
            display: grid;
            grid-template-columns: 280px 1fr;
            gap: 1.5rem;
            max-width: 1200px;
            margin: 0 auto;
        }
        .card {
            background: #1a1a1a;
            border-radius: 12px;
            padding: 1.5rem;
            border: 1px solid #333;
        }
        .card h2 {
            color: #00ff88;
            font-size: 1rem;
            margin-bottom: 1rem;
            text-transform: uppercase;
            letter-spacing: 1px;
        }
        input[type=file] { color: #888; margin-bottom: 1rem; width: 100%; }
        .file-item {
            display: flex;
            justify-content: space-between;
            padding: 0.4rem 0;
            border-bottom: 1px solid #222;
            font-size: 0.875rem;
        }
        #logs {
            font-family: monospace;
            font-size: 0.8rem;
            max-height: 220px;
            overflow-y: auto;
            margin-bottom: 1.5rem;
        }
        .log-error { color: #ff4444; }
        .log-info { color: #e0e0e0; }
        .log-success { color: #00ff88; }
        table.grades { width: 100%; border-collapse: collapse; margin-bottom: 1rem; }
        table.grades th, table.grades td {
            text-align: left;
            padding: 0.4rem;
            border-bottom: 1px solid #222;
        }
        table.grades th { color: #888; }
        .total-row td { color: #00ff88; font-weight: bold; }
        #overlay {
            display: none;
            position: fixed;
            inset: 0;
            background: rgba(0,0,0,0.9);
            color: #ff4444;
            font-size: 1.5rem;
            align-items: center;
            justify-content: center;
        }
    </style>
</head>
<body>
    <div class="header">
        <h1>Cellgrader</h1>
        <p>Notebook Autograder</p>
    </div>

    <div class="grid">
        <div>
            <div class="card">
                <h2>Upload</h2>
                <label>Question paper</label>
                <input type="file" id="question-file">
                <label>Notebooks</label>
                <input type="file" id="notebook-file" accept=".ipynb" multiple>
                <div id="file-list"></div>
            </div>
        </div>
        <div class="card">
            <h2>Log</h2>
            <div id="logs"></div>
            <h2>Grades</h2>
            <div id="grades"></div>
        </div>
    </div>

    <div id="overlay">Another grading tab is already open.</div>

    <script>
        const state = { question: null, queue: [], isProcessing: false };

        const ws = new WebSocket(`ws://${location.host}/ws`);
        ws.addEventListener('open', () => log('System', 'Connected to server', 'success'));
        ws.addEventListener('message', (msg) => {
            const data = JSON.parse(msg.data);
            switch (data.header) {
                case 'tab_conflict':
                    document.getElementById('overlay').style.display = 'flex';
                    ws.close();
                    break;
                case 'error':
                    log('Backend Error', data.message, 'error');
                    break;
                case 'grade_info':
                    log('Grader', data.message, 'info');
                    break;
                case 'final_grade':
                    addGrade(data.filename, JSON.parse(data.message));
                    break;
                case 'grade':
                    state.isProcessing = false;
                    const item = state.queue.find(f => f.name === data.filename);
                    if (item) { item.status = 'done'; updateSidebar(); }
                    log('Grader', `Finished grading ${data.filename}`, 'success');
                    processQueue();
                    break;
            }
        });

        document.getElementById('question-file').addEventListener('change', (e) => {
            state.question = e.target.files[0];
            log('System', `Question paper loaded: ${state.question.name}`, 'info');
        });

        document.getElementById('notebook-file').addEventListener('change', (e) => {
            for (const file of e.target.files) {
                state.queue.push({ name: file.name, file, status: 'pending' });
            }
            updateSidebar();
            processQueue();
        });

        function processQueue() {
            if (state.isProcessing) return;
            if (!state.question) { log('Error', 'Upload a question paper first', 'error'); return; }
            const next = state.queue.find(f => f.status === 'pending');
            if (!next) return;

            state.isProcessing = true;
            next.status = 'grading';
            updateSidebar();

            const form = new FormData();
            form.append('notebook', next.file);
            form.append('question_paper', state.question);
            fetch('/api/upload', { method: 'POST', body: form }).then(res => {
                if (!res.ok) throw new Error(`upload failed (${res.status})`);
                log('System', `Uploaded ${next.name}`, 'info');
            }).catch(err => {
                log('Error', err.message, 'error');
                next.status = 'error';
                state.isProcessing = false;
                updateSidebar();
                processQueue();
            });
        }

        function updateSidebar() {
            const icons = { pending: '…', grading: '⚙', done: '✓', error: '✗' };
            document.getElementById('file-list').innerHTML = state.queue.map(item =>
                `<div class="file-item"><span>${item.name}</span><span>${icons[item.status]}</span></div>`
            ).join('');
        }

        function addGrade(name, records) {
            let total = 0;
            const rows = records.map(r => {
                total += r.grade;
                return `<tr><td>${r.name}</td><td>${r.grade.toFixed(1)}</td><td>${r.feedback}</td></tr>`;
            }).join('');
            document.getElementById('grades').insertAdjacentHTML('beforeend', `
                <h3 style="color:#00ff88;margin:0.5rem 0">${name}</h3>
                <table class="grades">
                    <tr><th>Question</th><th>Grade</th><th>Feedback</th></tr>
                    ${rows}
                    <tr class="total-row"><td>Total</td><td>${total.toFixed(1)}</td><td></td></tr>
                </table>`);
        }

        function log(source, msg, kind) {
            const logs = document.getElementById('logs');
            logs.insertAdjacentHTML('beforeend',
                `<div><b>${source}:</b> <span class="log-${kind}">${msg}</span></div>`);
            logs.scrollTop = logs.scrollHeight;
        }
    </script>
</body>
</html>
"#;
