//! Binary format codec: filenames, the log header/record/sentinel format,
//! and the self-describing pack/snapshot containers (§4.1).

pub mod container;
pub mod filenames;
pub mod log_format;

pub use container::{
    decode_pack_file, decode_snapshot_file, encode_pack_file, encode_snapshot_file, total_changes,
    validate_pack_data, PackEntry, PackFile, SnapshotFile, FORMAT_VERSION,
};
pub use filenames::{
    file_name_of, generate_log_filename, generate_pack_filename, generate_snapshot_filename,
    generate_update_filename, parse_log_filename, parse_pack_filename, parse_snapshot_filename,
    parse_update_filename, DocumentScope, ParsedLogFilename, ParsedPackFilename,
    ParsedSnapshotFilename, ParsedUpdateFilename,
};
pub use log_format::{
    parse_log_header, read_log_record, write_log_header, write_log_record,
    write_termination_sentinel, LogRecord, ReadOutcome, HEADER_LEN,
};
