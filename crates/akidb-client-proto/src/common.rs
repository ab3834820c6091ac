//! Messages shared by every schema generation.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerInfoRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerInfoReply {
    #[prost(string, tag = "1")]
    pub server_version: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "2")]
    pub schema_versions: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// Zero when the server does not enforce a limit of its own.
    #[prost(int64, tag = "3")]
    pub max_message_size: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ConsistencyLevel {
    Unspecified = 0,
    One = 1,
    Quorum = 2,
    All = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FilterOperator {
    Unspecified = 0,
    Equal = 1,
    NotEqual = 2,
    GreaterThan = 3,
    GreaterThanEqual = 4,
    LessThan = 5,
    LessThanEqual = 6,
    And = 7,
    Or = 8,
    Like = 9,
    IsNull = 10,
    ContainsAny = 11,
    ContainsAll = 12,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TextArray {
    #[prost(string, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// Filter tree node. `And`/`Or` nodes carry operands in `filters`, leaves
/// carry a property path in `on` and exactly one value.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Filters {
    #[prost(enumeration = "FilterOperator", tag = "1")]
    pub operator: i32,
    #[prost(string, repeated, tag = "2")]
    pub on: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(message, repeated, tag = "3")]
    pub filters: ::prost::alloc::vec::Vec<Filters>,
    #[prost(string, optional, tag = "4")]
    pub value_text: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(int64, optional, tag = "5")]
    pub value_int: ::core::option::Option<i64>,
    #[prost(double, optional, tag = "6")]
    pub value_number: ::core::option::Option<f64>,
    #[prost(bool, optional, tag = "7")]
    pub value_boolean: ::core::option::Option<bool>,
    #[prost(message, optional, tag = "8")]
    pub value_text_array: ::core::option::Option<TextArray>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GenerativeSearch {
    #[prost(string, tag = "1")]
    pub single_response_prompt: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub grouped_response_task: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "3")]
    pub grouped_properties: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupBy {
    #[prost(string, repeated, tag = "1")]
    pub path: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(int32, tag = "2")]
    pub number_of_groups: i32,
    #[prost(int32, tag = "3")]
    pub objects_per_group: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetadataRequest {
    #[prost(bool, tag = "1")]
    pub uuid: bool,
    #[prost(bool, tag = "2")]
    pub vector: bool,
    #[prost(bool, tag = "3")]
    pub creation_time_unix: bool,
    #[prost(bool, tag = "4")]
    pub last_update_time_unix: bool,
    #[prost(bool, tag = "5")]
    pub distance: bool,
    #[prost(bool, tag = "6")]
    pub certainty: bool,
    #[prost(bool, tag = "7")]
    pub score: bool,
    #[prost(bool, tag = "8")]
    pub explain_score: bool,
    #[prost(bool, tag = "9")]
    pub is_consistent: bool,
}

/// Reference property to resolve in a search. Request generations before
/// v52 have no field for it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RefPropertiesRequest {
    #[prost(string, tag = "1")]
    pub reference_property: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "2")]
    pub properties: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(message, optional, tag = "3")]
    pub metadata: ::core::option::Option<MetadataRequest>,
    #[prost(string, tag = "4")]
    pub target_collection: ::prost::alloc::string::String,
}

/// Per-object rejection in a batch reply. `index` refers to the position in
/// the request's `objects` list.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchError {
    #[prost(int32, tag = "1")]
    pub index: i32,
    #[prost(string, tag = "2")]
    pub error: ::prost::alloc::string::String,
}

/// Batch reply for generations before v6.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchObjectsReply {
    #[prost(float, tag = "1")]
    pub took: f32,
    #[prost(message, repeated, tag = "2")]
    pub errors: ::prost::alloc::vec::Vec<BatchError>,
}
