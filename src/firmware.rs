//! Intel-HEX style firmware images for VEX controllers.
//!
//! Each line reads `:LLAAAATT<data><checksum>`. The record type `TT` is not
//! interpreted: any line at address 0 is treated as a non-data record and
//! skipped. Extended-address and other non-data records at a nonzero address
//! would be misread as data.

use std::path::Path;

use crate::errors::{BrickError, ValidationError};
use crate::protocol::pic::{check_program_range, ERASE_BLOCK, WRITE_BLOCK};

/// Largest image the controller's program memory holds
pub const IMAGE_CAPACITY: usize = 0x7800;

/// Bytes sent per write cluster: eight 8 byte blocks
pub const CLUSTER: usize = ERASE_BLOCK as usize;

/// Blocks per write cluster
pub const CLUSTER_BLOCKS: usize = CLUSTER / WRITE_BLOCK;

/// One data line of a hex file
#[derive(Debug, Clone, PartialEq, Eq)]
struct Record {
    address: u32,
    data: Vec<u8>,
}

fn hex_byte(line: &str, at: usize, line_no: usize) -> Result<u8, ValidationError> {
    let digits = line.get(at..at + 2).ok_or_else(|| ValidationError::HexLine {
        line: line_no,
        reason: "line is truncated".to_string(),
    })?;
    u8::from_str_radix(digits, 16).map_err(|_| ValidationError::HexLine {
        line: line_no,
        reason: format!("'{}' is not a hex byte", digits),
    })
}

fn parse_line(line: &str, line_no: usize) -> Result<Option<Record>, ValidationError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !line.starts_with(':') {
        return Err(ValidationError::HexLine {
            line: line_no,
            reason: "missing ':'".to_string(),
        });
    }

    let len = hex_byte(line, 1, line_no)?;
    let address = u16::from_be_bytes([hex_byte(line, 3, line_no)?, hex_byte(line, 5, line_no)?]);
    if address == 0 {
        return Ok(None);
    }
    let record_type = hex_byte(line, 7, line_no)?;

    let mut data = Vec::with_capacity(len as usize);
    for i in 0..len as usize {
        data.push(hex_byte(line, 9 + 2 * i, line_no)?);
    }
    let stated = hex_byte(line, 9 + 2 * len as usize, line_no)?;

    let [hi, lo] = address.to_be_bytes();
    let sum = [len, hi, lo, record_type]
        .iter()
        .chain(data.iter())
        .fold(stated, |sum, b| sum.wrapping_add(*b));
    if sum != 0 {
        return Err(ValidationError::HexLine {
            line: line_no,
            reason: "checksum mismatch".to_string(),
        });
    }

    Ok(Some(Record {
        address: address as u32,
        data,
    }))
}

/// A program image laid out from `start` in whole 64 byte clusters, padded
/// with 0xFF so unwritten flash keeps its erased state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    start: u32,
    end: u32,
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Parses a hex file and checks it fits the writable program window.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let mut records = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if let Some(record) = parse_line(line, i + 1)? {
                records.push(record);
            }
        }

        // First pass: bounds
        let start = records.iter().map(|r| r.address).min();
        let end = records.iter().map(|r| r.address + r.data.len() as u32).max();
        let (start, end) = match (start, end) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(ValidationError::HexLine {
                    line: 0,
                    reason: "no data records".to_string(),
                })
            }
        };
        check_program_range(start, end)?;

        // Second pass: fill
        let clusters = ((end - start) / ERASE_BLOCK + 1) as usize;
        let mut data = vec![0xFFu8; (clusters * CLUSTER).min(IMAGE_CAPACITY)];
        for record in &records {
            let offset = (record.address - start) as usize;
            data[offset..offset + record.data.len()].copy_from_slice(&record.data);
        }

        Ok(FirmwareImage { start, end, data })
    }

    /// Reads and parses a hex file from disk.
    pub fn from_file(path: &Path) -> Result<Self, BrickError> {
        let text = std::fs::read_to_string(path).map_err(|e| BrickError::LocalFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(FirmwareImage::parse(&text)?)
    }

    /// First programmed address
    pub fn start(&self) -> u32 {
        self.start
    }

    /// One past the last programmed address
    pub fn end(&self) -> u32 {
        self.end
    }

    /// The padded image, starting at `start`
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The image as `(address, 64 bytes)` write clusters.
    pub fn clusters(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        let start = self.start;
        self.data
            .chunks(CLUSTER)
            .enumerate()
            .map(move |(i, chunk)| (start + (i * CLUSTER) as u32, chunk))
    }

    pub fn cluster_count(&self) -> usize {
        self.data.len().div_ceil(CLUSTER)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a data line with a correct checksum.
    pub(crate) fn hex_line(address: u16, data: &[u8]) -> String {
        let [hi, lo] = address.to_be_bytes();
        let mut bytes = vec![data.len() as u8, hi, lo, 0x00];
        bytes.extend_from_slice(data);
        let checksum = bytes.iter().fold(0u8, |s, b| s.wrapping_add(*b)).wrapping_neg();
        bytes.push(checksum);
        let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
        format!(":{}", hex)
    }

    /// A hex file whose data spans `[start, end)` in 16 byte records.
    pub(crate) fn hex_file(start: u16, end: u16) -> String {
        let mut lines = vec![":020000040000FA".to_string()];
        let mut address = start;
        while address < end {
            let len = (end - address).min(16);
            let data: Vec<u8> = (0..len).map(|i| (address + i) as u8).collect();
            lines.push(hex_line(address, &data));
            address += len;
        }
        lines.push(":00000001FF".to_string());
        lines.join("\n")
    }

    #[test]
    fn images_span_their_data_records() {
        let image = FirmwareImage::parse(&hex_file(0x0810, 0x0900)).unwrap();
        assert_eq!(image.start(), 0x0810);
        assert_eq!(image.end(), 0x0900);
        assert_eq!(image.cluster_count(), (0x0900 - 0x0810) / 64 + 1);
        assert_eq!(image.data()[0], 0x10);
        // Padding past the last record keeps flash erased
        assert_eq!(*image.data().last().unwrap(), 0xFF);
    }

    #[test]
    fn images_below_the_bootloader_are_rejected() {
        assert!(matches!(
            FirmwareImage::parse(&hex_file(0x0700, 0x0900)),
            Err(ValidationError::ProgramRange { start: 0x0700, .. })
        ));
    }

    #[test]
    fn images_past_the_window_are_rejected() {
        assert!(matches!(
            FirmwareImage::parse(&hex_file(0x7f00, 0x7ffe)),
            Err(ValidationError::ProgramRange { .. })
        ));
    }

    #[test]
    fn gaps_between_records_stay_erased() {
        let text = [hex_line(0x0800, &[1, 2]), hex_line(0x0810, &[3])].join("\n");
        let image = FirmwareImage::parse(&text).unwrap();
        assert_eq!(&image.data()[..3], &[1, 2, 0xFF]);
        assert_eq!(image.data()[0x10], 3);
    }

    #[test]
    fn corrupt_lines_name_their_line_number() {
        let mut bad = hex_line(0x0800, &[1, 2, 3]);
        bad.replace_range(9..11, "FF");
        let text = format!("{}\n{}", hex_line(0x0810, &[1]), bad);
        assert_eq!(
            FirmwareImage::parse(&text),
            Err(ValidationError::HexLine {
                line: 2,
                reason: "checksum mismatch".to_string()
            })
        );
        assert!(FirmwareImage::parse(":0408").is_err());
        assert!(FirmwareImage::parse("").is_err());
    }

    #[test]
    fn clusters_walk_forward_in_64_byte_steps() {
        let image = FirmwareImage::parse(&hex_file(0x0800, 0x0880)).unwrap();
        let addresses: Vec<u32> = image.clusters().map(|(a, _)| a).collect();
        assert_eq!(addresses, vec![0x0800, 0x0840, 0x0880]);
        assert!(image.clusters().all(|(_, c)| c.len() == CLUSTER));
    }
}
