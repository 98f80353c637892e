// Transcript columns of the video resource table. The owning application
// holds the full table; only the columns below are read or written here.

diesel::table! {
    videos (id) {
        id -> Text,
        language -> Text,
        transcript -> Nullable<Text>,
        transcript_status -> Nullable<Text>,
        transcript_source -> Text,
        transcript_last_error -> Nullable<Text>,
        transcript_attempts -> Integer,
        transcript_updated_at -> Nullable<Text>,
    }
}
