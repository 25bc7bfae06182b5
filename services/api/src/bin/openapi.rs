//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI document for the progress REST API.
//!
//! Usage: `openapi [PATH]`. PATH defaults to `openapi.json` in the working
//! directory.

use api_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

const DEFAULT_PATH: &str = "openapi.json";

fn write_document(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let document = ApiDoc::openapi().to_pretty_json()?;
    std::fs::write(path, document)?;
    println!("OpenAPI document written to {}", path);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_PATH.to_string());
    write_document(&path)
}
