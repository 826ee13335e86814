use std::io::Write;

use crate::error::Result;
use crate::state::TaskRecord;

/// Writes one JSON object per record, one per line.
pub fn write_records<W: Write>(records: &[TaskRecord], mut out: W) -> Result<()> {
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

pub fn dump_records(records: &[TaskRecord]) -> Result<()> {
    write_records(records, std::io::stdout().lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::serialize::parse_str;

    #[test]
    fn test_one_line_per_record() {
        let trace = parse_str("0: 10 5 gemm (3)\n1 2: 0 1 potrf\n");
        let mut out = Vec::new();
        write_records(&trace.records, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"name":"gemm","raw_name":"gemm (3)","cache":3,"proc_id":0,"thread_id":0,"start":10.0,"length":5.0,"end":15.0}"#
        );
    }
}
