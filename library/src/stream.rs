/// Stream identifiers. Every unit is a set of streams keyed by these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum StreamId {
    Control = 0,
    Integer,
    Real,
    String,
    Procedure,
    Label,
    InitPcode,
    SlotInitPcode,
    BodyPcode,
    Symtab,
    Public,
    Import,
    Inherit,
    DeclaredSlot,
    Text,
    Length,
}

impl StreamId {
    pub const ALL: [StreamId; 16] = [
        StreamId::Control,
        StreamId::Integer,
        StreamId::Real,
        StreamId::String,
        StreamId::Procedure,
        StreamId::Label,
        StreamId::InitPcode,
        StreamId::SlotInitPcode,
        StreamId::BodyPcode,
        StreamId::Symtab,
        StreamId::Public,
        StreamId::Import,
        StreamId::Inherit,
        StreamId::DeclaredSlot,
        StreamId::Text,
        StreamId::Length,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            StreamId::Control => "control",
            StreamId::Integer => "integer",
            StreamId::Real => "real",
            StreamId::String => "string",
            StreamId::Procedure => "procedure",
            StreamId::Label => "label",
            StreamId::InitPcode => "init-pcode",
            StreamId::SlotInitPcode => "slot-init-pcode",
            StreamId::BodyPcode => "body-pcode",
            StreamId::Symtab => "symtab",
            StreamId::Public => "public",
            StreamId::Import => "import",
            StreamId::Inherit => "inherit",
            StreamId::DeclaredSlot => "declared-slot",
            StreamId::Text => "text",
            StreamId::Length => "length",
        }
    }
}

impl TryFrom<u16> for StreamId {
    type Error = u16;

    fn try_from(raw: u16) -> Result<Self, u16> {
        StreamId::ALL.get(raw as usize).copied().ok_or(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense() {
        for (i, id) in StreamId::ALL.iter().enumerate() {
            assert_eq!(*id as usize, i);
            assert_eq!(StreamId::try_from(i as u16), Ok(*id));
        }
        assert_eq!(StreamId::try_from(16), Err(16));
    }
}
