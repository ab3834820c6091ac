use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use akidb_client::{Client, OperationHandle};
use akidb_client_core::{
    ClientError, ObjectOutcome, ObjectWriteRequest, OutcomeStatus, OutcomeSummary, VectorValue,
};
use anyhow::{anyhow, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// JSON Lines file, one object per line
    #[arg(long)]
    file: PathBuf,

    /// Collection for lines that do not name one
    #[arg(long)]
    collection: Option<String>,

    /// Objects per submitted operation
    #[arg(long, default_value = "1000")]
    chunk_size: usize,
}

/// One input line. A line without a `properties` key is taken as the
/// properties object itself.
#[derive(Debug, Deserialize)]
struct InputLine {
    token: Option<String>,
    id: Option<Uuid>,
    collection: Option<String>,
    tenant: Option<String>,
    properties: JsonValue,
    vector: Option<VectorValue>,
    #[serde(default)]
    vectors: BTreeMap<String, VectorValue>,
}

fn parse_line(line_no: usize, line: &str) -> Result<ObjectWriteRequest> {
    let value: JsonValue =
        serde_json::from_str(line).with_context(|| format!("line {line_no}: invalid JSON"))?;
    let input = if value.get("properties").is_some() {
        serde_json::from_value::<InputLine>(value)
            .with_context(|| format!("line {line_no}: malformed object"))?
    } else {
        InputLine {
            token: None,
            id: None,
            collection: None,
            tenant: None,
            properties: value,
            vector: None,
            vectors: BTreeMap::new(),
        }
    };

    let token = input.token.unwrap_or_else(|| format!("line-{line_no}"));
    let mut object = ObjectWriteRequest::new(token, &input.properties)
        .map_err(|err| anyhow!("line {line_no}: {err}"))?;
    if let Some(id) = input.id {
        object = object.with_id(id);
    }
    if let Some(collection) = input.collection {
        object = object.with_collection(collection);
    }
    if let Some(tenant) = input.tenant {
        object = object.with_tenant(tenant);
    }
    if let Some(vector) = input.vector {
        object = object.with_vector(vector);
    }
    for (name, vector) in input.vectors {
        object = object.with_named_vector(name, vector);
    }
    Ok(object)
}

async fn read_objects(path: &Path) -> Result<Vec<ObjectWriteRequest>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| parse_line(index + 1, line))
        .collect()
}

async fn wait_all(
    client: &Client,
    handles: &[OperationHandle],
    pb: &ProgressBar,
) -> Vec<ObjectOutcome> {
    let mut outcomes = Vec::new();
    let mut cancelled = false;
    for handle in handles {
        let wait = client.wait(handle);
        tokio::pin!(wait);
        let result = loop {
            tokio::select! {
                result = &mut wait => break result,
                _ = tokio::signal::ctrl_c(), if !cancelled => {
                    warn!("interrupted, cancelling pending objects");
                    cancelled = true;
                    handles.iter().for_each(OperationHandle::cancel);
                }
            }
        };
        match result {
            Ok(batch) => outcomes.extend(batch),
            Err(ClientError::Cancelled) => {}
            Err(err) => warn!(operation = %handle.id(), error = %err, "operation failed"),
        }
        pb.inc(handle.len() as u64);
    }
    outcomes
}

/// Submits the file in chunks and reports per-object outcomes.
pub async fn run(client: &Client, args: IngestArgs) -> Result<()> {
    let mut objects = read_objects(&args.file).await?;
    if let Some(collection) = &args.collection {
        for object in objects.iter_mut().filter(|o| o.collection.is_none()) {
            object.collection = Some(collection.clone());
        }
    }
    let total = objects.len();
    info!(file = %args.file.display(), objects = total, "ingest starting");

    let pb = ProgressBar::new(total as u64);
    pb.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}",
    )?);

    let started = Instant::now();
    let chunk_size = args.chunk_size.max(1);
    let mut handles = Vec::new();
    let mut rest = objects;
    while !rest.is_empty() {
        let tail = rest.split_off(chunk_size.min(rest.len()));
        handles.push(client.submit(rest).await?);
        rest = tail;
    }
    let outcomes = wait_all(client, &handles, &pb).await;
    pb.finish_and_clear();

    let summary = OutcomeSummary::from_outcomes(&outcomes);
    for outcome in outcomes.iter().filter(|o| o.status == OutcomeStatus::Failed) {
        eprintln!("{}", serde_json::to_string(outcome)?);
    }
    let elapsed = started.elapsed().as_secs_f64();
    println!(
        "{}",
        serde_json::json!({
            "objects": total,
            "succeeded": summary.succeeded,
            "failed": summary.failed,
            "not_attempted": total - summary.succeeded - summary.failed,
            "elapsed_secs": elapsed,
        })
    );
    if summary.succeeded == total {
        Ok(())
    } else {
        Err(anyhow!("{} of {total} objects were not written", total - summary.succeeded))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_bare_line_is_properties() {
        let object = parse_line(7, r#"{"title":"a"}"#).unwrap();
        assert_eq!(object.token.as_str(), "line-7");
        assert_eq!(&object.properties[..], br#"{"title":"a"}"#);
        assert!(object.vector.is_none());
    }

    #[test]
    fn test_structured_line() {
        let id = Uuid::new_v4();
        let line = format!(
            r#"{{"token":"doc-1","id":"{id}","collection":"Articles","properties":{{"n":1}},"vector":[0.5,0.25],"vectors":{{"colbert":[[1.0],[2.0]]}}}}"#
        );
        let object = parse_line(1, &line).unwrap();
        assert_eq!(object.token.as_str(), "doc-1");
        assert_eq!(object.id, id);
        assert_eq!(object.collection.as_deref(), Some("Articles"));
        assert_eq!(object.vector, Some(VectorValue::Single(vec![0.5, 0.25])));
        assert!(object.named_vectors["colbert"].is_multi());
    }

    #[test]
    fn test_non_object_properties_rejected() {
        let err = parse_line(3, r#"{"properties":[1,2]}"#).unwrap_err();
        assert!(err.to_string().starts_with("line 3"));
        assert!(parse_line(4, "{oops").is_err());
    }

    #[tokio::test]
    async fn test_read_objects_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"a":1}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"a":2}}"#).unwrap();

        let objects = read_objects(file.path()).await.unwrap();
        let tokens: Vec<&str> = objects.iter().map(|o| o.token.as_str()).collect();
        assert_eq!(tokens, vec!["line-1", "line-3"]);
    }
}
