use std::time::Duration;

use akidb_client::Client;
use akidb_client_core::{
    Filter, FilterValue, HybridQuery, NearImage, NearVector, QueryDescription, QueryReference,
};
use anyhow::{anyhow, Result};
use clap::Args;
use tracing::warn;

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Collection to search
    #[arg(long)]
    collection: String,

    /// Comma-separated query vector for a near-vector search
    #[arg(long, value_delimiter = ',', conflicts_with = "hybrid")]
    vector: Vec<f32>,

    /// Keyword text for a hybrid search
    #[arg(long)]
    hybrid: Option<String>,

    /// Base64-encoded image for a near-image search
    #[arg(long, conflicts_with_all = ["hybrid", "vector"])]
    image: Option<String>,

    /// Reference properties to follow, returning all properties of linked objects
    #[arg(long = "reference")]
    references: Vec<String>,

    /// `property=value` equality filters, combined with AND
    #[arg(long = "where")]
    filters: Vec<String>,

    #[arg(long)]
    limit: Option<u32>,

    #[arg(long)]
    tenant: Option<String>,

    /// Per-call deadline in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

fn parse_filter(expr: &str) -> Result<Filter> {
    let (name, raw) = expr
        .split_once('=')
        .ok_or_else(|| anyhow!("filter `{expr}` is not of the form property=value"))?;
    let value = if let Ok(number) = raw.parse::<i64>() {
        FilterValue::from(number)
    } else if let Ok(number) = raw.parse::<f64>() {
        FilterValue::from(number)
    } else if let Ok(flag) = raw.parse::<bool>() {
        FilterValue::from(flag)
    } else {
        FilterValue::from(raw)
    };
    Ok(Filter::equal(name.trim(), value))
}

fn build_query(args: &QueryArgs) -> Result<QueryDescription> {
    let mut query = match (&args.hybrid, &args.image) {
        (Some(text), _) => {
            QueryDescription::hybrid(&args.collection, HybridQuery::new(text.as_str()))
        }
        (None, Some(image)) => {
            QueryDescription::near_image(&args.collection, NearImage::new(image.as_str()))
        }
        (None, None) if !args.vector.is_empty() => {
            QueryDescription::near_vector(&args.collection, NearVector::new(args.vector.clone()))
        }
        (None, None) => QueryDescription::fetch(&args.collection),
    };
    for link_on in &args.references {
        query = query.with_reference(QueryReference::new(link_on.as_str()));
    }
    let filter = args
        .filters
        .iter()
        .map(|expr| parse_filter(expr))
        .try_fold(None::<Filter>, |acc, filter| {
            let filter = filter?;
            Ok::<_, anyhow::Error>(Some(match acc {
                Some(acc) => acc.and(filter),
                None => filter,
            }))
        })?;
    if let Some(filter) = filter {
        query = query.with_filter(filter);
    }
    if let Some(limit) = args.limit {
        query = query.with_limit(limit);
    }
    if let Some(tenant) = &args.tenant {
        query = query.with_tenant(tenant.as_str());
    }
    Ok(query)
}

/// Prints one JSON document per record. Records that fail to decode are
/// logged and skipped.
pub async fn run(client: &Client, args: QueryArgs) -> Result<()> {
    let query = build_query(&args)?;
    let results = match args.timeout_ms {
        Some(ms) => client.query_with_deadline(&query, Duration::from_millis(ms)).await?,
        None => client.query(&query).await?,
    };
    for record in results {
        match record {
            Ok(record) => println!("{}", serde_json::to_string(&record)?),
            Err(err) => warn!(error = %err, "skipping undecodable record"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use akidb_client_core::SearchMode;

    use super::*;

    fn args(vector: Vec<f32>, filters: &[&str]) -> QueryArgs {
        QueryArgs {
            collection: "Articles".into(),
            vector,
            hybrid: None,
            image: None,
            references: Vec::new(),
            filters: filters.iter().map(|f| f.to_string()).collect(),
            limit: Some(5),
            tenant: None,
            timeout_ms: None,
        }
    }

    #[test]
    fn test_mode_follows_arguments() {
        let fetch = build_query(&args(Vec::new(), &[])).unwrap();
        assert!(matches!(fetch.mode, SearchMode::Fetch));
        assert_eq!(fetch.limit, Some(5));

        let near = build_query(&args(vec![0.1, 0.2], &[])).unwrap();
        assert!(matches!(near.mode, SearchMode::NearVector(_)));
    }

    #[test]
    fn test_image_and_references() {
        let mut args = args(Vec::new(), &[]);
        args.image = Some("aW1n".into());
        args.references = vec!["author".into()];
        let query = build_query(&args).unwrap();
        assert!(matches!(query.mode, SearchMode::NearImage(_)));
        assert_eq!(query.return_references[0].link_on, "author");
    }

    #[test]
    fn test_filters_are_typed_and_combined() {
        let query = build_query(&args(Vec::new(), &["lang=en", "year=2024"])).unwrap();
        let expected = Filter::equal("lang", "en").and(Filter::equal("year", 2024_i64));
        assert_eq!(query.filter, Some(expected));
    }

    #[test]
    fn test_malformed_filter_rejected() {
        assert!(build_query(&args(Vec::new(), &["lang"])).is_err());
    }
}
