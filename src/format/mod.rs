/// MPEG Transport Stream packets, tables, demuxer and muxer
pub mod ts;
