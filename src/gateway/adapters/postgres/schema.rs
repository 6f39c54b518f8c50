//! Diesel schema for shared gateway state.

diesel::table! {
    /// Versioned key/value records shared by every gateway worker.
    gateway_state (key) {
        /// Namespaced key.
        key -> Text,
        /// Stored JSON value.
        value -> Jsonb,
        /// Write version drawn from `gateway_state_version_seq`.
        version -> Int8,
        /// Expiry instant; `NULL` never expires.
        expires_at -> Nullable<Timestamptz>,
        /// Last write timestamp.
        updated_at -> Timestamptz,
    }
}
