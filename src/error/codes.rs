/// Error code registry for cubeflow
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Planning errors
/// - 3000-3999: Scheduling errors
/// - 4000-4999: Fragment fetch errors
/// - 5000-5999: Reassembly errors
/// - 6000-6999: Broker and result store errors
/// - 7000-7999: Garbage collection errors
/// - 9000-9999: Other errors
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_PARSE_ERROR: u16 = 1002;
    pub const CONFIG_INVALID_VALUE: u16 = 1003;

    // Planning errors (2000-2999)
    pub const PLAN_GENERIC: u16 = 2000;
    pub const PLAN_BAD_INPUT: u16 = 2001;
    pub const PLAN_INTERNAL: u16 = 2002;
    pub const PLAN_EMPTY: u16 = 2003;

    // Scheduling errors (3000-3999)
    pub const SCHEDULE_GENERIC: u16 = 3000;
    pub const SCHEDULE_HEADER_WRITE: u16 = 3001;
    pub const SCHEDULE_PUBLISH: u16 = 3002;
    pub const SCHEDULE_CANCELLED: u16 = 3003;

    // Fragment fetch errors (4000-4999)
    pub const FETCH_GENERIC: u16 = 4000;
    pub const FETCH_NOT_FOUND: u16 = 4001;
    pub const FETCH_FORBIDDEN: u16 = 4002;
    pub const FETCH_UNAVAILABLE: u16 = 4003;
    pub const FETCH_CANCELLED: u16 = 4004;

    // Reassembly errors (5000-5999)
    pub const REASSEMBLY_GENERIC: u16 = 5000;
    pub const REASSEMBLY_INIT: u16 = 5001;
    pub const REASSEMBLY_ADD: u16 = 5002;
    pub const REASSEMBLY_PACK: u16 = 5003;

    // Broker and result store errors (6000-6999)
    pub const BROKER_GENERIC: u16 = 6000;
    pub const BROKER_CONNECTION: u16 = 6001;
    pub const RESULT_NOT_FOUND: u16 = 6002;
    pub const RESULT_MALFORMED_HEADER: u16 = 6003;
    pub const RESULT_PART_FAILED: u16 = 6004;
    pub const RESULT_TIMEOUT: u16 = 6005;

    // Garbage collection errors (7000-7999)
    pub const GC_GENERIC: u16 = 7000;
    pub const GC_DELETE_FAILED: u16 = 7001;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
}

/// Describe an error code in a short sentence, for logs and CLI output
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        ErrorCode::CONFIG_NOT_FOUND => "Configuration file not found",
        ErrorCode::CONFIG_PARSE_ERROR => "Configuration file could not be parsed",
        ErrorCode::CONFIG_INVALID_VALUE => "Configuration value is out of range",
        ErrorCode::PLAN_BAD_INPUT => "Query was rejected by the planner",
        ErrorCode::PLAN_INTERNAL => "Planner failed internally",
        ErrorCode::PLAN_EMPTY => "Planner returned no process header",
        ErrorCode::SCHEDULE_HEADER_WRITE => "Process header could not be written",
        ErrorCode::SCHEDULE_PUBLISH => "Task could not be published to the queue",
        ErrorCode::SCHEDULE_CANCELLED => "Scheduling was cancelled",
        ErrorCode::FETCH_NOT_FOUND => "Fragment does not exist",
        ErrorCode::FETCH_FORBIDDEN => "Credentials were rejected by blob storage",
        ErrorCode::FETCH_UNAVAILABLE => "Blob storage is unavailable",
        ErrorCode::FETCH_CANCELLED => "Fragment fetch was cancelled",
        ErrorCode::REASSEMBLY_INIT => "Task could not be initialised for reassembly",
        ErrorCode::REASSEMBLY_ADD => "Fragment was rejected by reassembly",
        ErrorCode::REASSEMBLY_PACK => "Reassembled result could not be packed",
        ErrorCode::BROKER_CONNECTION => "Broker connection failed",
        ErrorCode::RESULT_NOT_FOUND => "No process header for this pid",
        ErrorCode::RESULT_MALFORMED_HEADER => "Process header is malformed",
        ErrorCode::RESULT_PART_FAILED => "A part of the process failed",
        ErrorCode::RESULT_TIMEOUT => "Timed out waiting for the result",
        ErrorCode::GC_DELETE_FAILED => "Consumer registration could not be deleted",
        c if (1000..2000).contains(&c) => "Configuration error",
        c if (2000..3000).contains(&c) => "Planning error",
        c if (3000..4000).contains(&c) => "Scheduling error",
        c if (4000..5000).contains(&c) => "Fragment fetch error",
        c if (5000..6000).contains(&c) => "Reassembly error",
        c if (6000..7000).contains(&c) => "Broker error",
        c if (7000..8000).contains(&c) => "Garbage collection error",
        _ => "Unknown error",
    }
}
