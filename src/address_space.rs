use thiserror::Error;

/// One contiguous region of guest virtual memory, analogous to a single
/// loaded segment. Storage is word-granular; a region's byte length is
/// always a multiple of four.
#[derive(Debug, Clone)]
pub struct Region {
    pub vaddr: u32,
    data: Vec<u32>,
}

impl Region {
    /// Build a region starting at `vaddr` backed by `words`. `words.len() *
    /// 4` is the region's byte length.
    pub fn new(vaddr: u32, words: Vec<u32>) -> Self {
        Self { vaddr, data: words }
    }

    pub fn len_bytes(&self) -> u32 {
        (self.data.len() as u32) * 4
    }

    fn contains(&self, addr: u32) -> bool {
        addr >= self.vaddr && addr < self.vaddr.wrapping_add(self.len_bytes())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MemoryFault {
    #[error("segmentation fault: address 0x{0:08x} is not mapped in any region")]
    Unmapped(u32),
    #[error("segmentation fault: address 0x{0:08x} is not 4-byte aligned")]
    Misaligned(u32),
}

/// An ordered list of non-overlapping guest memory regions. Lookup is
/// linear over the region list, which is fine for the handful of regions a
/// loaded program needs.
#[derive(Debug, Default, Clone)]
pub struct AddressSpace {
    regions: Vec<Region>,
}

impl AddressSpace {
    pub fn new(regions: Vec<Region>) -> Self {
        Self { regions }
    }

    fn find(&self, addr: u32) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    fn find_mut(&mut self, addr: u32) -> Option<&mut Region> {
        self.regions.iter_mut().find(|r| r.contains(addr))
    }

    /// Fetch the 32-bit word at `addr`. `addr` must be 4-aligned and fall
    /// within some region, or this is a segmentation fault.
    pub fn fetch_word(&self, addr: u32) -> Result<u32, MemoryFault> {
        if addr % 4 != 0 {
            return Err(MemoryFault::Misaligned(addr));
        }
        let region = self.find(addr).ok_or(MemoryFault::Unmapped(addr))?;
        let index = ((addr - region.vaddr) / 4) as usize;
        Ok(region.data[index])
    }

    /// Overwrite the 32-bit word at `addr`, under the same lookup and
    /// alignment rules as `fetch_word`.
    pub fn store_word(&mut self, addr: u32, value: u32) -> Result<(), MemoryFault> {
        if addr % 4 != 0 {
            return Err(MemoryFault::Misaligned(addr));
        }
        let region = self.find_mut(addr).ok_or(MemoryFault::Unmapped(addr))?;
        let index = ((addr - region.vaddr) / 4) as usize;
        region.data[index] = value;
        Ok(())
    }

    /// Read the containing word for `addr` and extract the byte at lane
    /// `addr % 4` (lane 0 = bits 7..0, lane 3 = bits 31..24), zero-extended
    /// into a u32.
    pub fn load_byte(&self, addr: u32) -> Result<u8, MemoryFault> {
        let word_addr = addr & !0b11;
        let lane = addr & 0b11;
        let word = self.fetch_word_unaligned(word_addr)?;
        Ok(((word >> (lane * 8)) & 0xff) as u8)
    }

    /// Read-modify-write the containing word for `addr`, replacing the byte
    /// lane `addr % 4` with `value`.
    pub fn store_byte(&mut self, addr: u32, value: u8) -> Result<(), MemoryFault> {
        let word_addr = addr & !0b11;
        let lane = addr & 0b11;
        let word = self.fetch_word_unaligned(word_addr)?;
        let shift = lane * 8;
        let cleared = word & !(0xffu32 << shift);
        let replaced = cleared | (u32::from(value) << shift);
        self.store_word_unaligned(word_addr, replaced)
    }

    /// `fetch_word` without the alignment check, used internally by the
    /// byte-lane handlers which have already aligned the address themselves.
    fn fetch_word_unaligned(&self, addr: u32) -> Result<u32, MemoryFault> {
        let region = self.find(addr).ok_or(MemoryFault::Unmapped(addr))?;
        let index = ((addr - region.vaddr) / 4) as usize;
        Ok(region.data[index])
    }

    fn store_word_unaligned(&mut self, addr: u32, value: u32) -> Result<(), MemoryFault> {
        let region = self.find_mut(addr).ok_or(MemoryFault::Unmapped(addr))?;
        let index = ((addr - region.vaddr) / 4) as usize;
        region.data[index] = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> AddressSpace {
        AddressSpace::new(vec![
            Region::new(0x0040_0000, vec![0; 16]),
            Region::new(0x1001_0000, vec![0; 4]),
        ])
    }

    #[test]
    fn store_then_fetch_round_trips() {
        let mut space = space();
        space.store_word(0x0040_0004, 0xdead_beef).unwrap();
        assert_eq!(space.fetch_word(0x0040_0004).unwrap(), 0xdead_beef);
    }

    #[test]
    fn unmapped_address_is_a_fault() {
        let space = space();
        assert_eq!(
            space.fetch_word(0x2000_0000),
            Err(MemoryFault::Unmapped(0x2000_0000))
        );
    }

    #[test]
    fn misaligned_fetch_is_a_fault() {
        let space = space();
        assert_eq!(
            space.fetch_word(0x0040_0001),
            Err(MemoryFault::Misaligned(0x0040_0001))
        );
    }

    #[test]
    fn gap_between_regions_is_unmapped() {
        let space = space();
        assert_eq!(
            space.fetch_word(0x0080_0000),
            Err(MemoryFault::Unmapped(0x0080_0000))
        );
    }

    #[test]
    fn byte_lanes_round_trip_independently() {
        let mut space = space();
        for lane in 0..4u32 {
            let addr = 0x0040_0020 + lane;
            space.store_byte(addr, 0x12 + lane as u8).unwrap();
        }
        for lane in 0..4u32 {
            let addr = 0x0040_0020 + lane;
            assert_eq!(space.load_byte(addr).unwrap(), 0x12 + lane as u8);
        }
        // Byte 3 ends up in the top lane of the word.
        assert_eq!(
            space.fetch_word(0x0040_0020).unwrap(),
            u32::from_le_bytes([0x12, 0x13, 0x14, 0x15])
        );
    }

    #[test]
    fn first_match_wins_on_would_be_overlap() {
        // Regions never legitimately overlap, but the lookup rule is
        // defined as "first matching region" regardless.
        let space = AddressSpace::new(vec![
            Region::new(0, vec![1]),
            Region::new(0, vec![2]),
        ]);
        assert_eq!(space.fetch_word(0).unwrap(), 1);
    }
}
