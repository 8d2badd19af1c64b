use crate::config::{GoogleConfig, google_token_path};
use crate::models::CandidateRow;
use crate::sync::{HEADER, SheetError, SheetStore, is_header_row};
use chrono::{DateTime, Duration, Local, Utc};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::thread;
use std::time::Duration as StdDuration;

const OAUTH_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

// ---- OAuth ----

/// Outcome of a token lookup: either a usable access token, or the prepared
/// authorization session the front end must walk the user through.
pub enum AccessToken {
    Ready(String),
    AuthRequired(AuthSession),
}

pub struct AuthSession {
    auth_url: String,
    listener: TcpListener,
    state: String,
    redirect_uri: String,
    deadline: DateTime<Local>,
}

impl AuthSession {
    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    pub fn listen_addr(&self) -> String {
        self.listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: String,
    expires_at: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Load the stored token, refreshing it when it is about to expire. When
/// there is no token yet (or the refresh is rejected) the caller gets a
/// prepared [`AuthSession`] to run the one-time browser authorization.
pub fn ensure_access_token(config: &GoogleConfig) -> Result<AccessToken, SheetError> {
    if config.client_id.trim().is_empty() || config.client_secret.trim().is_empty() {
        return Err(SheetError::Config(
            "Google client_id/client_secret required in config.toml".to_string(),
        ));
    }

    let token_path = google_token_path();
    if !token_path.exists() {
        let session = start_oauth_flow(config)?;
        return Ok(AccessToken::AuthRequired(session));
    }

    let stored = load_token(&token_path)?;
    let now = Utc::now().timestamp();
    if stored.expires_at > now + 60 {
        return Ok(AccessToken::Ready(stored.access_token));
    }

    match refresh_access_token(config, &stored.refresh_token) {
        Ok(updated) => {
            save_token(&token_path, &updated)?;
            Ok(AccessToken::Ready(updated.access_token))
        }
        Err(_) => {
            let session = start_oauth_flow(config)?;
            Ok(AccessToken::AuthRequired(session))
        }
    }
}

fn start_oauth_flow(config: &GoogleConfig) -> Result<AuthSession, SheetError> {
    let listener =
        TcpListener::bind("127.0.0.1:0").map_err(|e| SheetError::Request(e.to_string()))?;
    let addr = listener
        .local_addr()
        .map_err(|e| SheetError::Request(e.to_string()))?;
    let redirect_uri = format!("http://{}", addr);
    let state = generate_state();

    let auth_url = Url::parse_with_params(
        OAUTH_AUTH_URL,
        [
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", SHEETS_SCOPE),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state.as_str()),
        ],
    )
    .map_err(|e| SheetError::Request(e.to_string()))?
    .to_string();

    Ok(AuthSession {
        auth_url,
        listener,
        state,
        redirect_uri,
        deadline: Local::now() + Duration::minutes(10),
    })
}

/// Block until the browser redirect arrives (or the session deadline
/// passes), exchange the code and persist the token. Returns the fresh
/// access token.
pub fn complete_oauth_flow(
    config: &GoogleConfig,
    session: AuthSession,
) -> Result<String, SheetError> {
    let client = Client::new();
    let token_path = google_token_path();
    session
        .listener
        .set_nonblocking(true)
        .map_err(|e| SheetError::Request(e.to_string()))?;

    loop {
        if Local::now() >= session.deadline {
            return Err(SheetError::Auth(
                "Google authorization timed out. Please retry.".to_string(),
            ));
        }

        match session.listener.accept() {
            Ok((mut stream, _addr)) => {
                let stored =
                    handle_auth_redirect(&client, config, &session, &mut stream, &token_path)?;
                return Ok(stored.access_token);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(StdDuration::from_millis(200));
            }
            Err(err) => return Err(SheetError::Request(err.to_string())),
        }
    }
}

fn handle_auth_redirect(
    client: &Client,
    config: &GoogleConfig,
    session: &AuthSession,
    stream: &mut TcpStream,
    token_path: &Path,
) -> Result<StoredToken, SheetError> {
    stream
        .set_read_timeout(Some(StdDuration::from_secs(2)))
        .map_err(|e| SheetError::Request(e.to_string()))?;
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf);
    let request = String::from_utf8_lossy(&buf);
    let request_line = request.lines().next().unwrap_or("");
    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
    let query = path.split_once('?').map(|(_, q)| q).unwrap_or("");
    let params = parse_query(query);

    if let Some(error) = params.get("error") {
        let desc = params
            .get("error_description")
            .map(|s| format!(" ({})", s))
            .unwrap_or_default();
        let _ = respond_with_message(stream, &format!("Authorization failed: {error}{desc}"));
        return Err(SheetError::Auth(format!("Google auth failed: {error}{desc}")));
    }

    let Some(code) = params.get("code") else {
        let _ = respond_with_message(stream, "Missing authorization code.");
        return Err(SheetError::Auth(
            "Missing authorization code from Google.".to_string(),
        ));
    };

    if params.get("state").map(String::as_str) != Some(session.state.as_str()) {
        let _ = respond_with_message(stream, "Invalid state.");
        return Err(SheetError::Auth(
            "Invalid OAuth state. Please retry.".to_string(),
        ));
    }

    let resp = client
        .post(OAUTH_TOKEN_URL)
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("code", code.as_str()),
            ("redirect_uri", session.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .map_err(|e| SheetError::Request(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        let detail = format_oauth_error(status, &body);
        let _ = respond_with_message(stream, &format!("Authorization failed: {}", detail));
        return Err(SheetError::Auth(detail));
    }

    let token: TokenResponse = resp
        .json()
        .map_err(|e| SheetError::Request(e.to_string()))?;
    let Some(refresh) = token.refresh_token else {
        let _ = respond_with_message(
            stream,
            "Missing refresh token. Please retry and grant offline access.",
        );
        return Err(SheetError::Auth(
            "Missing refresh token from Google.".to_string(),
        ));
    };

    let stored = StoredToken {
        access_token: token.access_token,
        refresh_token: refresh,
        expires_at: (Utc::now() + Duration::seconds(token.expires_in as i64)).timestamp(),
    };
    save_token(token_path, &stored)?;
    let _ = respond_with_message(stream, "Authorization complete. You can close this window.");
    Ok(stored)
}

fn refresh_access_token(
    config: &GoogleConfig,
    refresh_token: &str,
) -> Result<StoredToken, SheetError> {
    let client = Client::new();
    let resp = client
        .post(OAUTH_TOKEN_URL)
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .map_err(|e| SheetError::Request(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(SheetError::Auth(format!(
            "Token refresh failed: HTTP {}",
            resp.status()
        )));
    }

    let token: TokenResponse = resp
        .json()
        .map_err(|e| SheetError::Request(e.to_string()))?;
    Ok(StoredToken {
        access_token: token.access_token,
        refresh_token: token
            .refresh_token
            .unwrap_or_else(|| refresh_token.to_string()),
        expires_at: (Utc::now() + Duration::seconds(token.expires_in as i64)).timestamp(),
    })
}

fn load_token(path: &Path) -> Result<StoredToken, SheetError> {
    let content = fs::read_to_string(path)?;
    let token: StoredToken =
        serde_json::from_str(&content).map_err(|e| SheetError::Request(e.to_string()))?;
    Ok(token)
}

fn save_token(path: &Path, token: &StoredToken) -> Result<(), SheetError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content =
        serde_json::to_string_pretty(token).map_err(|e| SheetError::Request(e.to_string()))?;
    fs::write(path, content)?;
    Ok(())
}

fn respond_with_message(stream: &mut TcpStream, message: &str) -> io::Result<()> {
    let body = format!("{message}\n");
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())
}

fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(decode_component(key), decode_component(value));
    }
    params
}

fn decode_component(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::new();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Some(hex) = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|s| u8::from_str_radix(s, 16).ok())
                {
                    out.push(hex as char);
                    i += 3;
                } else {
                    out.push('%');
                    i += 1;
                }
            }
            _ => {
                out.push(bytes[i] as char);
                i += 1;
            }
        }
    }
    out
}

fn generate_state() -> String {
    use rand::{Rng, distributions::Alphanumeric};
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn format_oauth_error(status: reqwest::StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("HTTP {}", status);
    }

    let summary = if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(trimmed) {
        if let Some(desc) = err.error_description {
            format!("{} ({})", desc, err.error)
        } else {
            err.error
        }
    } else {
        truncate_error(trimmed)
    };
    format!("HTTP {}: {}", status, summary)
}

fn truncate_error(message: &str) -> String {
    let mut out = message.replace(['\n', '\r'], " ");
    if out.len() > 240 {
        out.truncate(240);
        out.push_str("...");
    }
    out
}

// ---- Sheets ----

#[derive(Deserialize)]
struct ValueRange {
    values: Option<Vec<Vec<String>>>,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    sheets: Option<Vec<SheetMeta>>,
}

#[derive(Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    #[serde(rename = "sheetId")]
    sheet_id: i64,
    title: String,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

/// Sheets v4 client bound to one spreadsheet. Values traffic goes through
/// the `values` endpoints; structural edits (header insert, sort, new tab)
/// go through `batchUpdate`, which needs the numeric sheet id resolved from
/// spreadsheet metadata.
pub struct GoogleSheets {
    client: Client,
    access_token: String,
    spreadsheet_id: String,
    sheet_ids: HashMap<String, i64>,
}

impl GoogleSheets {
    /// Bind to a spreadsheet, verifying the id is real and reachable first.
    pub fn open(access_token: String, spreadsheet_id: &str) -> Result<Self, SheetError> {
        let sheets = Self {
            client: Client::new(),
            access_token,
            spreadsheet_id: spreadsheet_id.trim().to_string(),
            sheet_ids: HashMap::new(),
        };

        let url = format!("{SHEETS_API}/{}", sheets.spreadsheet_id);
        let resp = sheets
            .client
            .get(url)
            .bearer_auth(&sheets.access_token)
            .query(&[("fields", "spreadsheetId")])
            .send()
            .map_err(|e| SheetError::Request(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 404 || status.as_u16() == 403 {
            return Err(SheetError::NotFound(
                "The provided Google Sheet ID does not exist or cannot be accessed.".to_string(),
            ));
        }
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(request_failed("Spreadsheet lookup failed", status, &body));
        }

        Ok(sheets)
    }

    pub fn spreadsheet_url(&self) -> String {
        format!(
            "https://docs.google.com/spreadsheets/d/{}",
            self.spreadsheet_id
        )
    }

    /// Create the tab with the given grid capacity when it does not exist
    /// yet. Existing tabs are left untouched.
    pub fn ensure_tab(&mut self, title: &str, rows: u32, cols: u32) -> Result<(), SheetError> {
        let ids = self.fetch_sheet_ids()?;
        if let Some(id) = ids.get(title) {
            self.sheet_ids.insert(title.to_string(), *id);
            return Ok(());
        }

        let reply = self.batch_update(json!([{
            "addSheet": {
                "properties": {
                    "title": title,
                    "gridProperties": {"rowCount": rows, "columnCount": cols}
                }
            }
        }]))?;
        if let Some(id) = reply
            .pointer("/replies/0/addSheet/properties/sheetId")
            .and_then(|v| v.as_i64())
        {
            self.sheet_ids.insert(title.to_string(), id);
        }
        Ok(())
    }

    fn sheet_id(&mut self, title: &str) -> Result<i64, SheetError> {
        if let Some(id) = self.sheet_ids.get(title) {
            return Ok(*id);
        }
        let ids = self.fetch_sheet_ids()?;
        match ids.get(title) {
            Some(id) => {
                self.sheet_ids.insert(title.to_string(), *id);
                Ok(*id)
            }
            None => Err(SheetError::NotFound(format!(
                "Tab {title:?} not found in the spreadsheet."
            ))),
        }
    }

    fn fetch_sheet_ids(&self) -> Result<HashMap<String, i64>, SheetError> {
        let url = format!("{SHEETS_API}/{}", self.spreadsheet_id);
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[("fields", "sheets.properties(sheetId,title)")])
            .send()
            .map_err(|e| SheetError::Request(e.to_string()))?;
        let resp = check_status(resp, "Spreadsheet metadata fetch failed")?;
        let meta: SpreadsheetMeta = resp
            .json()
            .map_err(|e| SheetError::Request(e.to_string()))?;
        Ok(meta
            .sheets
            .unwrap_or_default()
            .into_iter()
            .map(|sheet| (sheet.properties.title, sheet.properties.sheet_id))
            .collect())
    }

    fn values_get(&self, range: &str) -> Result<Vec<Vec<String>>, SheetError> {
        let url = format!("{SHEETS_API}/{}/values/{range}", self.spreadsheet_id);
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .map_err(|e| SheetError::Request(e.to_string()))?;
        let resp = check_status(resp, "Sheet read failed")?;
        let body: ValueRange = resp
            .json()
            .map_err(|e| SheetError::Request(e.to_string()))?;
        Ok(body.values.unwrap_or_default())
    }

    fn values_update(&self, range: &str, values: Vec<Vec<String>>) -> Result<(), SheetError> {
        let url = format!("{SHEETS_API}/{}/values/{range}", self.spreadsheet_id);
        let resp = self
            .client
            .put(url)
            .bearer_auth(&self.access_token)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({
                "range": range,
                "majorDimension": "ROWS",
                "values": values,
            }))
            .send()
            .map_err(|e| SheetError::Request(e.to_string()))?;
        check_status(resp, "Sheet write failed")?;
        Ok(())
    }

    fn batch_update(&self, requests: serde_json::Value) -> Result<serde_json::Value, SheetError> {
        let url = format!("{SHEETS_API}/{}:batchUpdate", self.spreadsheet_id);
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&json!({"requests": requests}))
            .send()
            .map_err(|e| SheetError::Request(e.to_string()))?;
        let resp = check_status(resp, "Sheet update failed")?;
        resp.json().map_err(|e| SheetError::Request(e.to_string()))
    }
}

impl SheetStore for GoogleSheets {
    fn read_all(&mut self, tab: &str) -> Result<Vec<Vec<String>>, SheetError> {
        self.values_get(tab)
    }

    fn ensure_header(&mut self, tab: &str) -> Result<(), SheetError> {
        let first = self.values_get(&format!("{tab}!1:1"))?;
        let row = first.into_iter().next().unwrap_or_default();
        if is_header_row(&row) {
            return Ok(());
        }

        let sheet_id = self.sheet_id(tab)?;
        let header_cells: Vec<serde_json::Value> = HEADER
            .iter()
            .map(|cell| {
                json!({
                    "userEnteredValue": {"stringValue": cell},
                    "userEnteredFormat": {"textFormat": {"bold": true}}
                })
            })
            .collect();
        self.batch_update(json!([
            {
                "insertDimension": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": 0,
                        "endIndex": 1
                    },
                    "inheritFromBefore": false
                }
            },
            {
                "updateCells": {
                    "start": {"sheetId": sheet_id, "rowIndex": 0, "columnIndex": 0},
                    "rows": [{"values": header_cells}],
                    "fields": "userEnteredValue,userEnteredFormat.textFormat.bold"
                }
            }
        ]))?;
        Ok(())
    }

    fn append(&mut self, tab: &str, rows: &[CandidateRow]) -> Result<(), SheetError> {
        if rows.is_empty() {
            return Ok(());
        }
        let current_rows = self.values_get(tab)?.len();
        let range = format!("{tab}!A{}", current_rows + 1);
        self.values_update(&range, rows_to_values(rows))
    }

    fn sort_by_date_desc(&mut self, tab: &str) -> Result<(), SheetError> {
        let sheet_id = self.sheet_id(tab)?;
        self.batch_update(json!([{
            "sortRange": {
                "range": {
                    "sheetId": sheet_id,
                    "startRowIndex": 1,
                    "startColumnIndex": 0,
                    "endColumnIndex": 2
                },
                "sortSpecs": [{"dimensionIndex": 0, "sortOrder": "DESCENDING"}]
            }
        }]))?;
        Ok(())
    }
}

fn rows_to_values(rows: &[CandidateRow]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| vec![row.date.clone(), row.text.clone()])
        .collect()
}

fn check_status(
    resp: reqwest::blocking::Response,
    context: &str,
) -> Result<reqwest::blocking::Response, SheetError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(request_failed(context, status, &body))
}

fn request_failed(context: &str, status: reqwest::StatusCode, body: &str) -> SheetError {
    let detail = match serde_json::from_str::<ApiErrorResponse>(body.trim()) {
        Ok(parsed) => parsed
            .error
            .and_then(|e| e.message)
            .unwrap_or_else(|| format!("HTTP {status}")),
        Err(_) if !body.trim().is_empty() => truncate_error(body.trim()),
        Err(_) => format!("HTTP {status}"),
    };
    let message = format!("{context}: {detail}");
    if status.as_u16() == 401 {
        SheetError::Auth(message)
    } else {
        SheetError::Request(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_redirect_query() {
        let params = parse_query("code=4%2FabC&state=xyz&scope=sheets+drive");
        assert_eq!(params.get("code").map(String::as_str), Some("4/abC"));
        assert_eq!(params.get("state").map(String::as_str), Some("xyz"));
        assert_eq!(params.get("scope").map(String::as_str), Some("sheets drive"));
    }

    #[test]
    fn candidate_rows_become_two_column_values() {
        let rows = vec![
            CandidateRow::new("2024-01-02 10:00:00", "btc up"),
            CandidateRow::new("2024-01-01 09:00:00", "btc down"),
        ];
        assert_eq!(
            rows_to_values(&rows),
            vec![
                vec!["2024-01-02 10:00:00".to_string(), "btc up".to_string()],
                vec!["2024-01-01 09:00:00".to_string(), "btc down".to_string()],
            ]
        );
    }

    #[test]
    fn api_errors_prefer_the_service_message() {
        let body = r#"{"error": {"code": 400, "message": "Invalid requests[0].sortRange"}}"#;
        let err = request_failed(
            "Sheet update failed",
            reqwest::StatusCode::BAD_REQUEST,
            body,
        );
        assert_eq!(
            err.message(),
            "Sheet update failed: Invalid requests[0].sortRange"
        );
    }
}
