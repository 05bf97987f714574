use anyhow::Result;

// Print the OpenAPI document for the HTTP API.
fn main() -> Result<()> {
    println!("{}", webforms::api::openapi().to_pretty_json()?);
    Ok(())
}
