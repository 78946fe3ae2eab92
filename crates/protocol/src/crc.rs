//! CRC-16/CCITT-FALSE as computed by the remote device.
//!
//! Polynomial `0x1021`, initial value `0xFFFF`, no reflection, no final XOR.
//! The same function verifies upload acknowledgements (over the request
//! bytes) and download chunks (over the sequence, length and payload).

const POLY: u16 = 0x1021;
const INIT: u16 = 0xFFFF;

const TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Computes the CRC16 of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(INIT, |crc, &byte| {
        let idx = ((crc >> 8) ^ byte as u16) & 0xFF;
        (crc << 8) ^ TABLE[idx as usize]
    })
}
