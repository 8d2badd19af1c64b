use std::io::{self, Write};

use chrono::Local;

mod config;
mod date_input;
mod filter;
mod integrations;
mod models;
mod source;
mod sync;

use config::Config;
use integrations::google::{self, AccessToken, GoogleSheets};
use integrations::telegram::GatewayClient;
use models::DateWindow;
use sync::SheetError;

fn main() {
    let config = Config::load();
    if let Err(message) = run(&config) {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

fn run(config: &Config) -> Result<(), String> {
    let spreadsheet_id = prompt("Enter the Google Sheet ID to update: ")?;
    if spreadsheet_id.is_empty() {
        return Err("A Google Sheet ID is required.".to_string());
    }

    // Validated before anything touches the network.
    let window = prompt_window()?;

    let access_token = obtain_access_token(config)?;
    let mut sheets =
        GoogleSheets::open(access_token, &spreadsheet_id).map_err(report_sheet_error)?;
    println!("Successfully connected to Google Sheets.");

    let gateway = GatewayClient::new(&config.telegram).map_err(|e| e.message())?;
    let messages = source::fetch_matching(
        &gateway,
        &config.telegram.channel,
        &window,
        &config.sheet.keyword,
        config.telegram.page_size,
    )
    .map_err(|e| e.message())?;
    let candidates = filter::to_candidates(&messages);

    if candidates.is_empty() {
        println!("No BTC messages found in the specified date range.");
        return Ok(());
    }

    sheets
        .ensure_tab(
            &config.sheet.tab_title,
            config.sheet.new_tab_rows,
            config.sheet.new_tab_cols,
        )
        .map_err(report_sheet_error)?;
    let added = sync::sync(&mut sheets, &config.sheet.tab_title, &candidates)
        .map_err(report_sheet_error)?;

    if added > 0 {
        println!("{added} new BTC messages added.");
    } else {
        println!("No new BTC messages to add.");
    }
    println!("Open Google Sheet: {}", sheets.spreadsheet_url());
    Ok(())
}

fn prompt_window() -> Result<DateWindow, String> {
    let last_day = prompt("Do you want to extract messages from the last day? (y/n): ")?;
    if last_day.eq_ignore_ascii_case("y") {
        return Ok(date_input::last_day_window(Local::now().naive_local()));
    }

    let start = prompt("Enter the start date (YYYY-MM-DD): ")?;
    let start = date_input::parse_date_input(&start)
        .ok_or_else(|| format!("Invalid start date {start:?}, expected YYYY-MM-DD."))?;
    let end = prompt("Enter the end date (YYYY-MM-DD): ")?;
    let end = date_input::parse_date_input(&end)
        .ok_or_else(|| format!("Invalid end date {end:?}, expected YYYY-MM-DD."))?;
    date_input::explicit_window(start, end)
}

fn obtain_access_token(config: &Config) -> Result<String, String> {
    match google::ensure_access_token(&config.google).map_err(report_sheet_error)? {
        AccessToken::Ready(token) => Ok(token),
        AccessToken::AuthRequired(session) => {
            println!("Google authorization required. Open this URL in your browser:");
            println!();
            println!("  {}", session.auth_url());
            println!();
            println!("Waiting for the redirect on http://{} ...", session.listen_addr());
            google::complete_oauth_flow(&config.google, session).map_err(report_sheet_error)
        }
    }
}

fn report_sheet_error(err: SheetError) -> String {
    match err {
        SheetError::Config(msg) => msg,
        SheetError::Auth(msg) => format!("Error with Google Sheets credentials: {msg}"),
        SheetError::NotFound(msg) => msg,
        SheetError::Request(msg) | SheetError::Io(msg) => msg,
    }
}

fn prompt(label: &str) -> Result<String, String> {
    print!("{label}");
    io::stdout().flush().map_err(|e| e.to_string())?;
    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    Ok(input.trim().to_string())
}
