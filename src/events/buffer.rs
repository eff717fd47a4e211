use super::{EventHeader, EventParseError, Fields};

/// Adds a layer to the stack.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferAddEvent {
    pub header: EventHeader,
    pub buffer_id: u32,
    pub has_alpha: bool,
    pub clear_color: [u8; 4],
    pub opacity: f64,
    /// Position in the stack, 0 at the bottom.  Clamped to the stack size.
    pub insertion_index: usize,
}

impl BufferAddEvent {
    pub(super) fn parse(header: EventHeader, mut fields: Fields<'_>) -> Result<Self, EventParseError> {
        let buffer_id = fields.u32("buffer_id")?;
        let has_alpha = fields.bool("has_alpha")?;
        let rgb = fields.rgb()?;
        let a = fields.u8("a")?;
        let opacity = fields.f64("opacity")?;
        let insertion_index = fields.u32("index")? as usize;
        fields.finish()?;
        Ok(Self {
            header,
            buffer_id,
            has_alpha,
            clear_color: [rgb[0], rgb[1], rgb[2], a],
            opacity,
            insertion_index,
        })
    }

    pub fn serialize(&self) -> String {
        let [r, g, b, a] = self.clear_color;
        format!(
            "{} {} {} {} {} {} {} {} {}",
            self.header.serialize("bufferAdd"),
            self.buffer_id,
            self.has_alpha as u8,
            r,
            g,
            b,
            a,
            self.opacity,
            self.insertion_index
        )
    }
}

/// Removes a layer from the stack.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferRemoveEvent {
    pub header: EventHeader,
    pub buffer_id: u32,
}

impl BufferRemoveEvent {
    pub(super) fn parse(header: EventHeader, mut fields: Fields<'_>) -> Result<Self, EventParseError> {
        let buffer_id = fields.u32("buffer_id")?;
        fields.finish()?;
        Ok(Self { header, buffer_id })
    }

    pub fn serialize(&self) -> String {
        format!("{} {}", self.header.serialize("bufferRemove"), self.buffer_id)
    }
}
