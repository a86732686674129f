use std::fmt;

/// Address space selected by the top byte of a header address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    Scene,
    Room,
}

impl AddressSpace {
    pub fn tag(self) -> u8 {
        match self {
            AddressSpace::Scene => 0x02,
            AddressSpace::Room => 0x03,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x02 => Some(AddressSpace::Scene),
            0x03 => Some(AddressSpace::Room),
            _ => None,
        }
    }
}

/// A 32-bit segmented address: tag byte on top, file-relative offset below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub u32);

impl Address {
    pub const OFFSET_MASK: u32 = 0x00FF_FFFF;

    pub fn new(space: AddressSpace, offset: u32) -> Self {
        Address(((space.tag() as u32) << 24) | (offset & Self::OFFSET_MASK))
    }

    /// Address of a header at the very start of a file.
    pub fn file_start(space: AddressSpace) -> Self {
        Address::new(space, 0)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn tag(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn space(self) -> Option<AddressSpace> {
        AddressSpace::from_tag(self.tag())
    }

    pub fn offset(self) -> usize {
        (self.0 & Self::OFFSET_MASK) as usize
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn is_word_aligned(self) -> bool {
        self.0 & 3 == 0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}
