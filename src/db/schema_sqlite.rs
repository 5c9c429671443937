// SQLite schema definitions
// This file mirrors schema.rs but uses SQLite-compatible types

diesel::table! {
    join_to_create_config (id) {
        id -> Integer,
        guild_id -> Text,
        trigger_channel_id -> Text,
        category_id -> Text,
        enabled -> Bool,
        delete_delay_seconds -> Integer,
        user_cooldown_seconds -> Integer,
        private_vc_role_id -> Nullable<Text>,
        force_private -> Bool,
        min_session_minutes -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    voice_temp_channels (id) {
        id -> Integer,
        guild_id -> Text,
        channel_id -> Text,
        trigger_channel_id -> Text,
        category_id -> Text,
        creator_user_id -> Text,
        creator_username -> Text,
        is_private -> Bool,
        owner_user_id -> Nullable<Text>,
        owner_username -> Nullable<Text>,
        max_concurrent_users -> Integer,
        created_at -> Text,
        deleted_at -> Nullable<Text>,
        total_lifetime_seconds -> Nullable<BigInt>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(join_to_create_config, voice_temp_channels,);
