pub const SESSIONS_TABLE_NAME: &str = "Sessions";
pub const SESSION_ID: &str = "session_id";
pub const START_TIME: &str = "start_time";
pub const TOTAL_DISTANCE_METERS: &str = "total_distance_meters";
pub const DURATION_SECONDS: &str = "duration_seconds";
pub const IS_FINISHED: &str = "is_finished";
pub const UNFINISHED_INDEX_NAME: &str = "idx_sessions_unfinished";

pub const POINTS_TABLE_NAME: &str = "Points";
pub const POINT_ID: &str = "point_id";
// Session id
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const TIMESTAMP_MILLIS: &str = "timestamp_millis";
pub const SEGMENT_INDEX: &str = "segment_index";
pub const SEQUENCE: &str = "sequence";
