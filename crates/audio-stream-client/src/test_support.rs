//! Small valid FLAC assets built in memory (verbatim subframes, 16-bit), native or in Ogg.

/// Deterministic sample for frame `i`, channel `ch`.
pub(crate) fn sample(i: usize, ch: usize) -> i16 {
    (((i * 37 + ch * 1013) % 4001) as i32 - 2000) as i16
}

/// Interleaved samples matching [`flac`] with the same arguments.
pub(crate) fn expected_samples(channels: usize, total_frames: usize) -> Vec<i16> {
    let mut out = Vec::with_capacity(channels * total_frames);
    for i in 0..total_frames {
        for ch in 0..channels {
            out.push(sample(i, ch));
        }
    }
    out
}

/// Encode `total_frames` frames of [`sample`] into a FLAC stream.
pub(crate) fn flac(sample_rate: u32, channels: usize, block: usize, total_frames: usize) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"fLaC");
    // STREAMINFO, last metadata block.
    out.push(0x80);
    out.extend_from_slice(&[0, 0, 34]);
    out.extend_from_slice(&stream_info(sample_rate, channels, block, total_frames));
    for (frame, _) in flac_frames(channels, block, total_frames) {
        out.extend_from_slice(&frame);
    }
    out
}

/// The same audio as [`flac`], encapsulated in Ogg pages (FLAC-in-Ogg mapping 1.0).
///
/// Up to four frames share a page, so a stream of a few thousand frames spans many pages.
pub(crate) fn ogg_flac(sample_rate: u32, channels: usize, block: usize, total_frames: usize) -> Vec<u8> {
    const SERIAL: u32 = 0x5EED;
    const FRAMES_PER_PAGE: usize = 4;

    let mut ident = vec![0x7F];
    ident.extend_from_slice(b"FLAC");
    ident.extend_from_slice(&[1, 0]);
    // Header packet count unknown.
    ident.extend_from_slice(&[0, 0]);
    ident.extend_from_slice(b"fLaC");
    ident.push(0x80);
    ident.extend_from_slice(&[0, 0, 34]);
    ident.extend_from_slice(&stream_info(sample_rate, channels, block, total_frames));

    let mut out = Vec::new();
    let mut seq = 0u32;
    ogg_page(&mut out, 0x02, 0, SERIAL, seq, &[ident.as_slice()]);

    let frames = flac_frames(channels, block, total_frames);
    let mut granule = 0u64;
    let pages: Vec<_> = frames.chunks(FRAMES_PER_PAGE).collect();
    for (i, page) in pages.iter().enumerate() {
        seq += 1;
        granule += page.iter().map(|(_, n)| *n as u64).sum::<u64>();
        let flags = if i + 1 == pages.len() { 0x04 } else { 0x00 };
        let packets: Vec<&[u8]> = page.iter().map(|(f, _)| f.as_slice()).collect();
        ogg_page(&mut out, flags, granule, SERIAL, seq, &packets);
    }
    out
}

fn stream_info(sample_rate: u32, channels: usize, block: usize, total_frames: usize) -> Vec<u8> {
    assert!((1..=8).contains(&channels));
    assert!((16..=65535).contains(&block));

    let mut out = Vec::with_capacity(34);
    out.extend_from_slice(&(block as u16).to_be_bytes());
    out.extend_from_slice(&(block as u16).to_be_bytes());
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&[0, 0, 0]);
    // 20 bits rate, 3 bits channels-1, 5 bits bps-1, 36 bits total samples.
    let packed: u64 = (u64::from(sample_rate) << 44)
        | (((channels as u64) - 1) << 41)
        | (15u64 << 36)
        | (total_frames as u64 & 0xF_FFFF_FFFF);
    out.extend_from_slice(&packed.to_be_bytes());
    out.extend_from_slice(&[0u8; 16]);
    out
}

/// Encoded frames with the number of samples per channel each carries.
fn flac_frames(channels: usize, block: usize, total_frames: usize) -> Vec<(Vec<u8>, usize)> {
    let mut frames = Vec::new();
    let mut start = 0usize;
    let mut frame_no = 0u32;
    while start < total_frames {
        let len = block.min(total_frames - start);
        let mut out = vec![0xFF, 0xF8];
        // Block size from 16-bit trailer; sample rate from STREAMINFO.
        out.push(0x70);
        out.push((((channels - 1) as u8) << 4) | 0x08);
        push_utf8_number(&mut out, frame_no);
        out.extend_from_slice(&((len - 1) as u16).to_be_bytes());
        let crc = crc8(&out);
        out.push(crc);

        for ch in 0..channels {
            out.push(0x02);
            for i in start..start + len {
                out.extend_from_slice(&sample(i, ch).to_be_bytes());
            }
        }
        let crc = crc16(&out);
        out.extend_from_slice(&crc.to_be_bytes());

        frames.push((out, len));
        start += len;
        frame_no += 1;
    }
    frames
}

fn ogg_page(out: &mut Vec<u8>, flags: u8, granule: u64, serial: u32, seq: u32, packets: &[&[u8]]) {
    let mut lacing = Vec::new();
    for p in packets {
        lacing.extend(std::iter::repeat_n(255u8, p.len() / 255));
        lacing.push((p.len() % 255) as u8);
    }
    assert!(lacing.len() <= 255, "too many segments for one page");

    let start = out.len();
    out.extend_from_slice(b"OggS");
    out.push(0);
    out.push(flags);
    out.extend_from_slice(&granule.to_le_bytes());
    out.extend_from_slice(&serial.to_le_bytes());
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.push(lacing.len() as u8);
    out.extend_from_slice(&lacing);
    for p in packets {
        out.extend_from_slice(p);
    }
    let crc = ogg_crc(&out[start..]);
    out[start + 22..start + 26].copy_from_slice(&crc.to_le_bytes());
}

fn push_utf8_number(out: &mut Vec<u8>, n: u32) {
    if n < 0x80 {
        out.push(n as u8);
    } else if n < 0x800 {
        out.push(0xC0 | (n >> 6) as u8);
        out.push(0x80 | (n & 0x3F) as u8);
    } else {
        assert!(n < 0x1_0000);
        out.push(0xE0 | (n >> 12) as u8);
        out.push(0x80 | ((n >> 6) & 0x3F) as u8);
        out.push(0x80 | (n & 0x3F) as u8);
    }
}

fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &b in data {
        crc ^= b;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
        }
    }
    crc
}

fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &b in data {
        crc ^= u16::from(b) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x8005 } else { crc << 1 };
        }
    }
    crc
}

fn ogg_crc(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &b in data {
        crc ^= u32::from(b) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 { (crc << 1) ^ 0x04C1_1DB7 } else { crc << 1 };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_reference_values() {
        // CRC-8/SMBUS and CRC-16/UMTS check values for "123456789".
        assert_eq!(crc8(b"123456789"), 0xF4);
        assert_eq!(crc16(b"123456789"), 0xFEE8);
        // CRC-32/POSIX without the final inversion.
        assert_eq!(ogg_crc(b"123456789"), !0x765E_7680);
    }

    #[test]
    fn layout_sizes() {
        let data = flac(44_100, 2, 256, 1000);
        assert_eq!(&data[..4], b"fLaC");
        // 4 frames: 3 full, one of 232.
        let header = 4 + 4 + 34;
        let frame_overhead = 2 + 1 + 1 + 1 + 2 + 1 + 2 + 2;
        assert_eq!(data.len(), header + 4 * frame_overhead + 1000 * 2 * 2);
    }

    #[test]
    fn ogg_pages_carry_granules_and_flags() {
        let data = ogg_flac(8_000, 1, 256, 2_000);
        let mut pages = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            assert_eq!(&data[pos..pos + 4], b"OggS");
            let flags = data[pos + 5];
            let granule = u64::from_le_bytes(data[pos + 6..pos + 14].try_into().unwrap());
            let segments = usize::from(data[pos + 26]);
            let body: usize = data[pos + 27..pos + 27 + segments]
                .iter()
                .map(|b| usize::from(*b))
                .sum();
            pages.push((flags, granule));
            pos += 27 + segments + body;
        }
        assert_eq!(pos, data.len());
        // Ident page plus 8 frames in pages of four.
        assert_eq!(pages, vec![(0x02, 0), (0x00, 1024), (0x04, 2_000)]);
    }
}
