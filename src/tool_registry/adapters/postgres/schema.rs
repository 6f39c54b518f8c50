//! Diesel schema for tool server persistence.

diesel::table! {
    /// Tool server configuration records.
    tool_servers (id) {
        /// Internal server identifier.
        id -> Uuid,
        /// Unique server name.
        #[max_length = 64]
        name -> Varchar,
        /// Connection descriptor as JSONB.
        transport -> Jsonb,
        /// Whether the gateway should use the server.
        enabled -> Bool,
        /// Last-known status (`unknown`, `connected`, `error`).
        #[max_length = 20]
        status -> Varchar,
        /// Last error message for the `error` status.
        last_error -> Nullable<Text>,
        /// When the status was observed.
        status_observed_at -> Timestamptz,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}
