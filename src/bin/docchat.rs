use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use reqwest::{Client, Response, Url};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

const SESSION_ID_HEADER: &str = "x-session-id";

#[derive(Parser)]
#[command(name = "docchat", about = "Chat with your documents from the terminal", version)]
struct Cli {
    /// Backend base URL
    #[arg(long, global = true, default_value = "http://localhost:8000", env = "DOCCHAT_SERVER")]
    server: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Set the OpenAI API key used by the backend
    SetKey {
        api_key: String,
    },

    /// Upload and index a document (.pdf, .docx, .txt, .html, .htm)
    Upload {
        path: PathBuf,
    },

    /// List uploaded documents
    List,

    /// Delete a document and its vectors
    Delete {
        file_id: i64,
    },

    /// Delete every document and all vectors
    ClearDocs,

    /// List recent chat sessions
    Sessions,

    /// Show the message history of a session
    History {
        session_id: String,
    },

    /// Delete the history of a session
    ClearSession {
        session_id: String,
    },

    /// Interactive chat; `/new` starts a new session, `/quit` exits
    Chat {
        /// Continue an existing session
        #[arg(long)]
        session: Option<String>,
        /// Chat model (must be allowed by the backend)
        #[arg(long)]
        model: Option<String>,
    },

    /// Ask a single question and print the streamed answer
    Ask {
        question: String,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
}

struct Api {
    base: Url,
    client: Client,
}

impl Api {
    fn new(base: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        let base = Url::parse(base).with_context(|| format!("Invalid server URL: {}", base))?;
        Ok(Self { base, client })
    }

    /// Appends percent-encoded path segments to the server URL.
    fn url(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Invalid server URL: {}", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json(&self, segments: &[&str]) -> anyhow::Result<Value> {
        let res = self
            .client
            .get(self.url(segments)?)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base))?;
        read_json(res).await
    }

    async fn post_json(&self, segments: &[&str], body: Option<Value>) -> anyhow::Result<Value> {
        let mut req = self.client.post(self.url(segments)?);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let res = req
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base))?;
        read_json(res).await
    }

    /// Streams an answer to stdout and returns the session id the backend used.
    async fn ask(
        &self,
        question: &str,
        session: Option<&str>,
        model: Option<&str>,
    ) -> anyhow::Result<String> {
        let mut body = json!({ "question": question });
        if let Some(session) = session {
            body["sessionId"] = json!(session);
        }
        if let Some(model) = model {
            body["model"] = json!(model);
        }

        let res = self
            .client
            .post(self.url(&["chat"])?)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base))?;
        let res = ensure_success(res).await?;

        let session_id = res
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| session.map(str::to_string))
            .unwrap_or_default();

        let mut stream = res.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        let mut stdout = std::io::stdout();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Answer stream interrupted")?;
            pending.extend_from_slice(&chunk);
            // Hold back a multi-byte character split across chunks.
            let ready = match std::str::from_utf8(&pending) {
                Ok(text) => text.len(),
                Err(err) => err.valid_up_to() + err.error_len().unwrap_or(0),
            };
            let text: Vec<u8> = pending.drain(..ready).collect();
            stdout.write_all(String::from_utf8_lossy(&text).as_bytes())?;
            stdout.flush()?;
        }
        if !pending.is_empty() {
            stdout.write_all(String::from_utf8_lossy(&pending).as_bytes())?;
        }
        println!();

        Ok(session_id)
    }
}

async fn ensure_success(res: Response) -> anyhow::Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let text = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or(text);
    Err(anyhow!("{} ({})", message, status))
}

async fn read_json(res: Response) -> anyhow::Result<Value> {
    let res = ensure_success(res).await?;
    res.json().await.context("Backend returned invalid JSON")
}

fn print_message(value: &Value) {
    match value["message"].as_str() {
        Some(message) => println!("{}", message),
        None => println!("{}", value),
    }
}

async fn upload(api: &Api, path: &Path) -> anyhow::Result<Value> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid file name: {}", path.display()))?
        .to_string();

    let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
    let form = reqwest::multipart::Form::new().part("file", part);
    let res = api
        .client
        .post(api.url(&["uploadDoc"])?)
        .multipart(form)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", api.base))?;
    read_json(res).await
}

async fn chat_loop(api: &Api, session: Option<String>, model: Option<String>) -> anyhow::Result<()> {
    let mut session = session;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Type a question. /new starts a new session, /quit exits.");
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                session = None;
                println!("Started a new session.");
                continue;
            }
            _ => {}
        }

        match api.ask(line, session.as_deref(), model.as_deref()).await {
            Ok(id) if !id.is_empty() => session = Some(id),
            Ok(_) => {}
            Err(err) => eprintln!("error: {:#}", err),
        }
    }

    if let Some(id) = session {
        println!("Session: {}", id);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let api = Api::new(&cli.server)?;

    match cli.command {
        Command::SetKey { api_key } => {
            if api_key.trim().is_empty() {
                bail!("API key cannot be empty");
            }
            let res = api
                .client
                .post(api.url(&["setApiKey"])?)
                .query(&[("api_key", api_key.as_str())])
                .send()
                .await
                .with_context(|| format!("Failed to reach {}", api.base))?;
            print_message(&read_json(res).await?);
        }
        Command::Upload { path } => {
            let value = upload(&api, &path).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                print_message(&value);
            }
        }
        Command::List => {
            let docs = api.get_json(&["listDocs"]).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&docs)?);
            } else {
                let docs = docs.as_array().cloned().unwrap_or_default();
                if docs.is_empty() {
                    println!("No documents uploaded.");
                }
                for doc in docs {
                    println!(
                        "{:>5}  {:<40}  {}",
                        doc["id"],
                        doc["filename"].as_str().unwrap_or_default(),
                        doc["uploadTimestamp"].as_str().unwrap_or_default()
                    );
                }
            }
        }
        Command::Delete { file_id } => {
            let value = api
                .post_json(&["deleteDoc"], Some(json!({ "fileId": file_id })))
                .await?;
            print_message(&value);
        }
        Command::ClearDocs => {
            print_message(&api.post_json(&["clearAllDocs"], None).await?);
        }
        Command::Sessions => {
            let value = api.get_json(&["sessions"]).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                for session in value["sessions"].as_array().cloned().unwrap_or_default() {
                    println!(
                        "{}  {:>3} exchanges  last {}",
                        session["sessionId"].as_str().unwrap_or_default(),
                        session["exchangeCount"],
                        session["lastActivity"].as_str().unwrap_or_default()
                    );
                }
            }
        }
        Command::History { session_id } => {
            let value = api
                .get_json(&["sessions", session_id.as_str(), "history"])
                .await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                for message in value["messages"].as_array().cloned().unwrap_or_default() {
                    println!(
                        "[{}] {}\n",
                        message["role"].as_str().unwrap_or_default(),
                        message["content"].as_str().unwrap_or_default()
                    );
                }
            }
        }
        Command::ClearSession { session_id } => {
            let value = api
                .post_json(&["clearSession", session_id.as_str()], None)
                .await?;
            print_message(&value);
        }
        Command::Chat { session, model } => {
            chat_loop(&api, session, model).await?;
        }
        Command::Ask {
            question,
            session,
            model,
        } => {
            let id = api
                .ask(&question, session.as_deref(), model.as_deref())
                .await?;
            eprintln!("session: {}", id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_keeps_base_path() {
        let api = Api::new("http://localhost:8000/").unwrap();
        assert_eq!(
            api.url(&["listDocs"]).unwrap().as_str(),
            "http://localhost:8000/listDocs"
        );

        let api = Api::new("http://example.com/docchat").unwrap();
        assert_eq!(
            api.url(&["sessions"]).unwrap().as_str(),
            "http://example.com/docchat/sessions"
        );
    }

    #[test]
    fn session_ids_are_encoded_as_one_segment() {
        let api = Api::new("http://localhost:8000").unwrap();
        let url = api.url(&["sessions", "a/b?c#d", "history"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/sessions/a%2Fb%3Fc%23d/history"
        );
        assert_eq!(url.path_segments().unwrap().count(), 3);
    }
}
