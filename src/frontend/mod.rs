//! Browser chat front end for the copywriting agent
//!
//! Serves a single page that talks to the agent service directly:
//! - health badge (connected / disconnected)
//! - session list with new / select / delete
//! - streamed answers rendered as `RunContent` events arrive
//!
//! The page reads its API base URL and user id from `/config.json`.

use axum::{
    extract::State,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::config::FrontendConfig;

/// Front end application state
#[derive(Clone)]
pub struct FrontendState {
    pub config: FrontendConfig,
}

/// Runtime settings handed to the page
#[derive(Debug, Serialize)]
pub struct PageConfig {
    pub api_base_url: String,
    pub user_id: String,
}

/// Create the front end router
pub fn create_router(state: FrontendState) -> Router {
    Router::new()
        .route("/", get(chat_page))
        .route("/config.json", get(page_config))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the HTML chat page
async fn chat_page() -> Html<&'static str> {
    Html(CHAT_HTML)
}

async fn page_config(State(state): State<FrontendState>) -> impl IntoResponse {
    Json(PageConfig {
        api_base_url: state.config.api_base_url.clone(),
        user_id: state.config.user_id.clone(),
    })
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// HTML chat page
///
/// Per chat turn the page moves idle → awaiting → streaming → idle; the
/// composer stays disabled outside `idle`.
const CHAT_HTML: &str = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Copywriter Modelador</title>
    <style>
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: #0a0a0a;
            color: #e0e0e0;
            height: 100vh;
            display: flex;
        }
        aside {
            width: 280px;
            background: #141414;
            border-right: 1px solid #2a2a2a;
            padding: 1.25rem;
            display: flex;
            flex-direction: column;
            gap: 1rem;
        }
        aside h1 {
            font-size: 1.25rem;
            background: linear-gradient(135deg, #ff7a59, #ffcc66);
            -webkit-background-clip: text;
            -webkit-text-fill-color: transparent;
        }
        .badge { font-size: 0.8rem; padding: 0.25rem 0.5rem; border-radius: 6px; display: inline-block; }
        .badge.ok { background: #0f3d26; color: #00ff88; }
        .badge.down { background: #3d0f0f; color: #ff4444; }
        .badge.pending { background: #2a2a2a; color: #888; }
        button {
            background: #2a2a2a;
            color: #e0e0e0;
            border: 1px solid #3a3a3a;
            border-radius: 8px;
            padding: 0.5rem 0.75rem;
            cursor: pointer;
        }
        button:hover:not(:disabled) { border-color: #ff7a59; }
        button:disabled { opacity: 0.5; cursor: default; }
        #sessions { list-style: none; overflow-y: auto; flex: 1; }
        #sessions li {
            display: flex;
            align-items: center;
            gap: 0.5rem;
            padding: 0.5rem;
            border-radius: 8px;
            cursor: pointer;
        }
        #sessions li.active { background: #2a2a2a; }
        #sessions li .title { flex: 1; overflow: hidden; text-overflow: ellipsis; white-space: nowrap; }
        #sessions li .date { color: #666; font-size: 0.75rem; }
        #sessions li .delete { padding: 0.1rem 0.4rem; font-size: 0.75rem; }
        .empty { color: #666; font-size: 0.875rem; }
        main { flex: 1; display: flex; flex-direction: column; }
        #session-label { padding: 1rem 1.5rem; border-bottom: 1px solid #2a2a2a; color: #888; font-size: 0.875rem; }
        #messages { flex: 1; overflow-y: auto; padding: 1.5rem; display: flex; flex-direction: column; gap: 1rem; }
        .msg { max-width: 760px; padding: 0.75rem 1rem; border-radius: 12px; white-space: pre-wrap; line-height: 1.5; }
        .msg.user { align-self: flex-end; background: #1f2a44; }
        .msg.assistant { align-self: flex-start; background: #1a1a1a; border: 1px solid #2a2a2a; }
        .msg.error { align-self: flex-start; background: #3d0f0f; color: #ff8888; border: 1px solid #ff4444; }
        details.tool { font-size: 0.8rem; color: #aaa; margin-bottom: 0.5rem; white-space: normal; }
        details.tool pre { white-space: pre-wrap; max-height: 240px; overflow-y: auto; color: #888; }
        form { display: flex; gap: 0.75rem; padding: 1rem 1.5rem; border-top: 1px solid #2a2a2a; }
        textarea {
            flex: 1;
            resize: none;
            height: 3.5rem;
            background: #141414;
            color: #e0e0e0;
            border: 1px solid #2a2a2a;
            border-radius: 8px;
            padding: 0.75rem;
            font: inherit;
        }
    </style>
</head>
<body>
    <aside>
        <h1>Copywriter Modelador</h1>
        <span id="status" class="badge pending">Checking API...</span>
        <button id="new-session">+ New session</button>
        <ul id="sessions"><li class="empty">Loading...</li></ul>
    </aside>
    <main>
        <div id="session-label">No session selected</div>
        <div id="messages"></div>
        <form id="composer">
            <textarea id="input" placeholder="Ask for a hook, a caption, a script..." disabled></textarea>
            <button id="send" type="submit" disabled>Send</button>
        </form>
    </main>

    <script>
        const ui = {
            config: null,
            agentId: null,
            sessionId: null,
            phase: 'idle',
            connected: false,
        };

        const $ = (id) => document.getElementById(id);

        function newSessionId() {
            return (crypto.randomUUID && crypto.randomUUID()) ||
                'xxxxxxxx-xxxx-4xxx-yxxx-xxxxxxxxxxxx'.replace(/[xy]/g, (c) => {
                    const r = Math.random() * 16 | 0;
                    return (c === 'x' ? r : (r & 0x3 | 0x8)).toString(16);
                });
        }

        function setPhase(phase) {
            ui.phase = phase;
            const busy = phase !== 'idle';
            const ready = ui.connected && ui.sessionId && !busy;
            $('input').disabled = !ready;
            $('send').disabled = !ready;
            $('new-session').disabled = busy;
            $('send').textContent = phase === 'awaiting' ? 'Thinking...' : phase === 'streaming' ? 'Writing...' : 'Send';
        }

        function setConnected(ok, detail) {
            ui.connected = ok;
            const badge = $('status');
            badge.className = 'badge ' + (ok ? 'ok' : 'down');
            badge.textContent = ok ? 'API connected' : 'API disconnected' + (detail ? ': ' + detail : '');
            setPhase(ui.phase);
        }

        async function api(path, options) {
            const res = await fetch(ui.config.api_base_url + path, options);
            if (!res.ok) {
                let detail = res.status + ' ' + res.statusText;
                try { detail = (await res.json()).detail || detail; } catch (_) {}
                throw new Error(detail);
            }
            return res;
        }

        function bubble(kind, text) {
            const el = document.createElement('div');
            el.className = 'msg ' + kind;
            el.textContent = text || '';
            $('messages').appendChild(el);
            $('messages').scrollTop = $('messages').scrollHeight;
            return el;
        }

        function toolEntry(parent, tool) {
            const details = document.createElement('details');
            details.className = 'tool';
            const summary = document.createElement('summary');
            const state = tool.error ? 'failed' : tool.result != null ? 'done' : 'running';
            summary.textContent = 'Tool ' + tool.tool_name + ' (' + state + ')';
            const pre = document.createElement('pre');
            pre.textContent = JSON.stringify(tool.arguments, null, 2) +
                (tool.result != null ? '\n\n' + tool.result : '') +
                (tool.error ? '\n\n' + tool.error : '');
            details.append(summary, pre);
            parent.appendChild(details);
            return details;
        }

        function renderTurn(turn) {
            bubble('user', turn.user_message);
            const el = bubble('assistant', '');
            (turn.tool_calls || []).forEach((tool) => toolEntry(el, tool));
            el.appendChild(document.createTextNode(turn.response));
        }

        async function checkHealth() {
            try {
                await api('/health');
                setConnected(true);
                return true;
            } catch (err) {
                setConnected(false, err.message);
                return false;
            }
        }

        async function loadAgent() {
            const agents = await (await api('/agents')).json();
            if (!agents.length) throw new Error('no agents configured');
            ui.agentId = agents[0].id;
            document.title = agents[0].name;
        }

        async function loadSessions() {
            const list = $('sessions');
            try {
                const query = '?user_id=' + encodeURIComponent(ui.config.user_id);
                const body = await (await api('/sessions' + query)).json();
                list.innerHTML = '';
                if (!body.data.length) {
                    list.innerHTML = '<li class="empty">No sessions yet</li>';
                    return;
                }
                body.data.forEach((s) => {
                    const li = document.createElement('li');
                    if (s.session_id === ui.sessionId) li.classList.add('active');
                    const title = document.createElement('span');
                    title.className = 'title';
                    title.textContent = s.title || s.session_id;
                    const date = document.createElement('span');
                    date.className = 'date';
                    date.textContent = new Date(s.updated_at).toLocaleDateString();
                    const del = document.createElement('button');
                    del.className = 'delete';
                    del.textContent = 'x';
                    del.title = 'Delete session';
                    del.onclick = (ev) => { ev.stopPropagation(); deleteSession(s.session_id); };
                    li.append(title, date, del);
                    li.onclick = () => selectSession(s.session_id);
                    list.appendChild(li);
                });
            } catch (err) {
                list.innerHTML = '';
                const li = document.createElement('li');
                li.className = 'empty';
                li.textContent = 'Could not load sessions: ' + err.message;
                list.appendChild(li);
            }
        }

        function startSession() {
            if (ui.phase !== 'idle') return;
            ui.sessionId = newSessionId();
            $('messages').innerHTML = '';
            $('session-label').textContent = 'New session ' + ui.sessionId;
            setPhase('idle');
            loadSessions();
        }

        async function selectSession(sessionId) {
            if (ui.phase !== 'idle') return;
            ui.sessionId = sessionId;
            $('session-label').textContent = 'Session ' + sessionId;
            $('messages').innerHTML = '';
            setPhase('idle');
            loadSessions();
            try {
                const body = await (await api('/sessions/' + encodeURIComponent(sessionId) + '/runs')).json();
                body.data.forEach(renderTurn);
            } catch (err) {
                bubble('error', 'Could not load session: ' + err.message);
            }
        }

        async function deleteSession(sessionId) {
            if (ui.phase !== 'idle') return;
            try {
                await api('/sessions/' + encodeURIComponent(sessionId), { method: 'DELETE' });
                if (ui.sessionId === sessionId) {
                    ui.sessionId = null;
                    $('messages').innerHTML = '';
                    $('session-label').textContent = 'No session selected';
                    setPhase('idle');
                }
            } catch (err) {
                bubble('error', 'Could not delete session: ' + err.message);
            }
            loadSessions();
        }

        function handleEvent(name, data, view) {
            switch (name) {
                case 'RunStarted':
                    setPhase('streaming');
                    break;
                case 'RunContent':
                    setPhase('streaming');
                    view.text.textContent += data.content;
                    break;
                case 'ToolCallStarted':
                    view.tools[data.tool.tool_call_id] = toolEntry(view.el, data.tool);
                    view.el.appendChild(view.text);
                    break;
                case 'ToolCallCompleted': {
                    const entry = toolEntry(view.el, data.tool);
                    const old = view.tools[data.tool.tool_call_id];
                    if (old) old.replaceWith(entry);
                    view.el.appendChild(view.text);
                    break;
                }
                case 'RunCompleted':
                    view.completed = true;
                    break;
                case 'RunError':
                    view.failed = true;
                    bubble('error', data.content || 'The agent failed to answer.');
                    break;
            }
            $('messages').scrollTop = $('messages').scrollHeight;
        }

        async function sendMessage(message) {
            setPhase('awaiting');
            bubble('user', message);
            const el = bubble('assistant', '');
            const text = document.createTextNode('');
            el.appendChild(text);
            const view = { el, text, tools: {}, completed: false, failed: false };

            try {
                const res = await api('/agents/' + encodeURIComponent(ui.agentId) + '/runs', {
                    method: 'POST',
                    headers: { 'Content-Type': 'application/json', 'Accept': 'text/event-stream' },
                    body: JSON.stringify({
                        message,
                        session_id: ui.sessionId,
                        user_id: ui.config.user_id,
                        stream: true,
                    }),
                });

                const reader = res.body.getReader();
                const decoder = new TextDecoder();
                let buffer = '';
                for (;;) {
                    const { value, done } = await reader.read();
                    if (done) break;
                    buffer += decoder.decode(value, { stream: true }).replace(/\r/g, '');
                    let cut;
                    while ((cut = buffer.indexOf('\n\n')) >= 0) {
                        const frame = buffer.slice(0, cut);
                        buffer = buffer.slice(cut + 2);
                        let name = 'message';
                        const data = [];
                        frame.split('\n').forEach((line) => {
                            if (line.startsWith('event:')) name = line.slice(6).trim();
                            else if (line.startsWith('data:')) data.push(line.slice(5).replace(/^ /, ''));
                        });
                        if (data.length) handleEvent(name, JSON.parse(data.join('\n')), view);
                    }
                }
                if (!view.completed && !view.failed) {
                    bubble('error', 'The response ended before completion.');
                }
            } catch (err) {
                bubble('error', 'Request failed: ' + err.message);
                checkHealth();
            }

            if (!el.textContent) el.remove();
            setPhase('idle');
            loadSessions();
        }

        $('new-session').onclick = startSession;
        $('composer').onsubmit = (ev) => {
            ev.preventDefault();
            const message = $('input').value.trim();
            if (!message || ui.phase !== 'idle' || !ui.sessionId) return;
            $('input').value = '';
            sendMessage(message);
        };
        $('input').onkeydown = (ev) => {
            if (ev.key === 'Enter' && !ev.shiftKey) {
                ev.preventDefault();
                $('composer').requestSubmit();
            }
        };

        async function init() {
            ui.config = await (await fetch('/config.json')).json();
            setPhase('idle');
            if (!(await checkHealth())) return;
            try {
                await loadAgent();
            } catch (err) {
                setConnected(false, err.message);
                return;
            }
            await loadSessions();
        }

        init();
    </script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state() -> FrontendState {
        FrontendState {
            config: FrontendConfig {
                api_base_url: "http://agent:8000".to_string(),
                user_id: "u1".to_string(),
                log_format: Default::default(),
            },
        }
    }

    #[tokio::test]
    async fn test_config_endpoint() {
        let response = create_router(state())
            .oneshot(Request::builder().uri("/config.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let config: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(config["api_base_url"], "http://agent:8000");
        assert_eq!(config["user_id"], "u1");
    }

    #[tokio::test]
    async fn test_page_is_served() {
        let response = create_router(state())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("/config.json"));
        assert!(html.contains("RunContent"));
    }
}
