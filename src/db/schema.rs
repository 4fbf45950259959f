diesel::table! {
    sound_mappings (mapping_key) {
        mapping_key -> Text,
        guild_id -> Text,
        trigger_token -> Text,
        source_url -> Text,
        clip_duration_seconds -> Nullable<Double>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
