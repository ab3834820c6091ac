//! Package `akidb.v6`: multi-vectors, structured generative output and
//! per-object error codes in batch replies.

use crate::common::{Filters, GenerativeSearch, GroupBy, MetadataRequest, RefPropertiesRequest};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Vectors {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub vector_bytes: ::prost::alloc::vec::Vec<u8>,
    #[prost(enumeration = "VectorType", tag = "3")]
    pub r#type: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum VectorType {
    /// Read as `SingleFp32`.
    Unspecified = 0,
    SingleFp32 = 1,
    /// Leading little-endian `u16` inner dimension, then the values row by row.
    MultiFp32 = 2,
}

/// Per-object failure category reported by v6 servers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ErrorCode {
    Unspecified = 0,
    InvalidArgument = 1,
    AlreadyExists = 2,
    PermissionDenied = 3,
    NotFound = 4,
    Unavailable = 5,
    ResourceExhausted = 6,
    DeadlineExceeded = 7,
    Internal = 8,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchError {
    #[prost(int32, tag = "1")]
    pub index: i32,
    #[prost(string, tag = "2")]
    pub error: ::prost::alloc::string::String,
    #[prost(enumeration = "ErrorCode", tag = "3")]
    pub code: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchObjectsReply {
    #[prost(float, tag = "1")]
    pub took: f32,
    #[prost(message, repeated, tag = "2")]
    pub errors: ::prost::alloc::vec::Vec<BatchError>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GenerativeReply {
    #[prost(string, tag = "1")]
    pub result: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GenerativeResult {
    #[prost(message, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<GenerativeReply>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchObject {
    #[prost(string, tag = "1")]
    pub uuid: ::prost::alloc::string::String,
    /// Superseded by `vector_bytes`; still read by servers speaking v4.
    #[prost(float, repeated, tag = "2")]
    pub vector: ::prost::alloc::vec::Vec<f32>,
    /// JSON-encoded property object.
    #[prost(bytes = "vec", tag = "3")]
    pub properties: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag = "4")]
    pub collection: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub tenant: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "6")]
    pub vector_bytes: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, repeated, tag = "7")]
    pub vectors: ::prost::alloc::vec::Vec<Vectors>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchObjectsRequest {
    #[prost(message, repeated, tag = "1")]
    pub objects: ::prost::alloc::vec::Vec<BatchObject>,
    #[prost(enumeration = "crate::common::ConsistencyLevel", optional, tag = "2")]
    pub consistency_level: ::core::option::Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NearVector {
    #[prost(float, repeated, tag = "1")]
    pub vector: ::prost::alloc::vec::Vec<f32>,
    #[prost(double, optional, tag = "2")]
    pub certainty: ::core::option::Option<f64>,
    #[prost(double, optional, tag = "3")]
    pub distance: ::core::option::Option<f64>,
    #[prost(bytes = "vec", tag = "4")]
    pub vector_bytes: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, repeated, tag = "5")]
    pub target_vectors: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// Typed query vectors; required for multi-vector targets.
    #[prost(message, repeated, tag = "6")]
    pub vectors: ::prost::alloc::vec::Vec<Vectors>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Hybrid {
    #[prost(string, tag = "1")]
    pub query: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "2")]
    pub properties: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(float, repeated, tag = "3")]
    pub vector: ::prost::alloc::vec::Vec<f32>,
    #[prost(float, tag = "4")]
    pub alpha: f32,
    #[prost(bytes = "vec", tag = "5")]
    pub vector_bytes: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, repeated, tag = "6")]
    pub target_vectors: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(message, repeated, tag = "7")]
    pub vectors: ::prost::alloc::vec::Vec<Vectors>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NearImageSearch {
    /// Base64-encoded image.
    #[prost(string, tag = "1")]
    pub image: ::prost::alloc::string::String,
    #[prost(double, optional, tag = "2")]
    pub certainty: ::core::option::Option<f64>,
    #[prost(double, optional, tag = "3")]
    pub distance: ::core::option::Option<f64>,
    #[prost(string, repeated, tag = "4")]
    pub target_vectors: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchRequest {
    #[prost(string, tag = "1")]
    pub collection: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub tenant: ::prost::alloc::string::String,
    #[prost(enumeration = "crate::common::ConsistencyLevel", optional, tag = "3")]
    pub consistency_level: ::core::option::Option<i32>,
    #[prost(uint32, tag = "4")]
    pub limit: u32,
    #[prost(uint32, tag = "5")]
    pub offset: u32,
    #[prost(uint32, tag = "6")]
    pub autocut: u32,
    #[prost(message, optional, tag = "7")]
    pub filters: ::core::option::Option<Filters>,
    #[prost(message, optional, tag = "8")]
    pub near_vector: ::core::option::Option<NearVector>,
    #[prost(message, optional, tag = "9")]
    pub hybrid: ::core::option::Option<Hybrid>,
    #[prost(message, optional, tag = "10")]
    pub generative: ::core::option::Option<GenerativeSearch>,
    #[prost(message, optional, tag = "11")]
    pub group_by: ::core::option::Option<GroupBy>,
    #[prost(message, optional, tag = "12")]
    pub metadata: ::core::option::Option<MetadataRequest>,
    #[prost(string, repeated, tag = "13")]
    pub properties: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(message, repeated, tag = "14")]
    pub ref_properties: ::prost::alloc::vec::Vec<RefPropertiesRequest>,
    #[prost(message, optional, tag = "15")]
    pub near_image: ::core::option::Option<NearImageSearch>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetadataResult {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(float, repeated, tag = "2")]
    pub vector: ::prost::alloc::vec::Vec<f32>,
    #[prost(int64, optional, tag = "3")]
    pub creation_time_unix: ::core::option::Option<i64>,
    #[prost(int64, optional, tag = "4")]
    pub last_update_time_unix: ::core::option::Option<i64>,
    #[prost(float, optional, tag = "5")]
    pub distance: ::core::option::Option<f32>,
    #[prost(float, optional, tag = "6")]
    pub certainty: ::core::option::Option<f32>,
    #[prost(float, optional, tag = "7")]
    pub score: ::core::option::Option<f32>,
    #[prost(string, optional, tag = "8")]
    pub explain_score: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(bool, optional, tag = "10")]
    pub is_consistent: ::core::option::Option<bool>,
    #[prost(bytes = "vec", tag = "11")]
    pub vector_bytes: ::prost::alloc::vec::Vec<u8>,
    /// Raw 16-byte UUID; preferred over `id` when present.
    #[prost(bytes = "vec", tag = "12")]
    pub id_as_bytes: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, repeated, tag = "13")]
    pub vectors: ::prost::alloc::vec::Vec<Vectors>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchResult {
    /// JSON-encoded property object.
    #[prost(bytes = "vec", tag = "1")]
    pub properties: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub metadata: ::core::option::Option<MetadataResult>,
    #[prost(message, optional, tag = "3")]
    pub generative: ::core::option::Option<GenerativeResult>,
    #[prost(message, repeated, tag = "4")]
    pub ref_props: ::prost::alloc::vec::Vec<RefPropertiesResult>,
    /// Collection the object was read from; empty when not reported.
    #[prost(string, tag = "5")]
    pub target_collection: ::prost::alloc::string::String,
    /// Set when the request asked for references, even if none resolved.
    #[prost(bool, tag = "6")]
    pub ref_props_requested: bool,
}

/// Objects linked through one reference property.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RefPropertiesResult {
    #[prost(string, tag = "1")]
    pub prop_name: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub properties: ::prost::alloc::vec::Vec<SearchResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupByResult {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(float, tag = "2")]
    pub min_distance: f32,
    #[prost(float, tag = "3")]
    pub max_distance: f32,
    #[prost(int64, tag = "4")]
    pub number_of_objects: i64,
    #[prost(message, repeated, tag = "5")]
    pub objects: ::prost::alloc::vec::Vec<SearchResult>,
    #[prost(message, optional, tag = "7")]
    pub generative: ::core::option::Option<GenerativeResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchReply {
    #[prost(float, tag = "1")]
    pub took: f32,
    #[prost(message, repeated, tag = "2")]
    pub results: ::prost::alloc::vec::Vec<SearchResult>,
    #[prost(message, repeated, tag = "4")]
    pub group_by_results: ::prost::alloc::vec::Vec<GroupByResult>,
    #[prost(message, optional, tag = "5")]
    pub generative_grouped_results: ::core::option::Option<GenerativeResult>,
}
