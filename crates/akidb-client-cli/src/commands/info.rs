use akidb_client::Client;
use anyhow::Result;
use serde_json::json;

/// Prints connection details as one JSON document.
pub fn run(client: &Client) -> Result<()> {
    let connection = client.connection();
    let server = connection.server_info();
    let stats = connection.state().stats();
    let report = json!({
        "endpoint": connection.endpoint(),
        "server_version": server.server_version.map(|v| v.to_string()),
        "schema_version": connection.schema_version().to_string(),
        "advertised_schema_versions": server
            .schema_versions
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
        "max_message_size": server.max_message_size,
        "health": stats.health.as_str(),
        "max_in_flight": connection.budget().max_in_flight(),
        "calls": stats.calls,
        "failures": stats.failures,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
