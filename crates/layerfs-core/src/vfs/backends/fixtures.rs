//! Synthesized images for tests.
//!
//! Also compiled into the integration tests through a `#[path]` module, so
//! this file only uses std.

#![allow(dead_code)]

pub const SECTOR: usize = 512;

/// A newc member: name, `[inode, mode, uid, gid, nlink, mtime]`, data.
pub struct Member<'a> {
    pub name: &'a str,
    pub fields: [u64; 6],
    pub data: &'a [u8],
}

fn pad4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn newc_header(out: &mut Vec<u8>, name: &str, fields: [u64; 6], data: &[u8]) {
    let [inode, mode, uid, gid, nlink, mtime] = fields;
    out.extend_from_slice(b"070701");
    let name_size = name.len() as u64 + 1;
    let values = [inode, mode, uid, gid, nlink, mtime, data.len() as u64, 0, 0, 0, 0, name_size, 0];
    for value in values {
        out.extend_from_slice(format!("{value:08X}").as_bytes());
    }
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    pad4(out);
    out.extend_from_slice(data);
    pad4(out);
}

/// The members in order, then the trailer.
pub fn newc_archive(members: &[Member<'_>]) -> Vec<u8> {
    let mut out = Vec::new();
    for member in members {
        newc_header(&mut out, member.name, member.fields, member.data);
    }
    newc_header(&mut out, "TRAILER!!!", [0, 0, 0, 0, 1, 0], &[]);
    out
}

/// 1247 bytes of printable text standing in for a syslog file.
pub fn syslog_data() -> Vec<u8> {
    let line = b"May 27 06:01:53 acserver kernel: [0.000000] Initializing cgroup\n";
    line.iter().copied().cycle().take(1247).collect()
}

/// The archive holding `syslog` with its recorded attributes.
pub fn syslog_archive() -> Vec<u8> {
    let data = syslog_data();
    newc_archive(&[Member {
        name: "syslog",
        fields: [45521, 0o100664, 1000, 1000, 1, 1432702913],
        data: &data,
    }])
}

/// `(partition_type, start sector, sector count)` for each entry of the
/// table at `sector`.
pub fn write_table(image: &mut [u8], sector: usize, entries: &[(u8, u32, u32)]) {
    let base = sector * SECTOR;
    for (i, (partition_type, start, count)) in entries.iter().enumerate() {
        let entry = base + 446 + i * 16;
        image[entry + 4] = *partition_type;
        image[entry + 8..entry + 12].copy_from_slice(&start.to_le_bytes());
        image[entry + 12..entry + 16].copy_from_slice(&count.to_le_bytes());
    }
    image[base + 510] = 0x55;
    image[base + 511] = 0xAA;
}

/// 2880 sectors: a primary Linux partition at 1..=350 and an extended
/// partition at 351..=2879 holding one logical Linux partition at
/// 352..=2879. `p2_data` is written at the start of the logical partition.
pub fn partitioned_image(p2_data: &[u8]) -> Vec<u8> {
    let mut image = vec![0u8; 2880 * SECTOR];
    write_table(&mut image, 0, &[(0x83, 1, 350), (0x05, 351, 2529)]);
    write_table(&mut image, 351, &[(0x83, 1, 2528)]);
    let start = 352 * SECTOR;
    image[start..start + p2_data.len()].copy_from_slice(p2_data);
    image
}
