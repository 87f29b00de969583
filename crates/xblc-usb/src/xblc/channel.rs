use xblc_audio::{AudioBackend, AudioChannel, ChannelError, Direction, PcmFormat};

/// Owns at most one open, resumed host channel for one direction.
pub struct ChannelSlot {
    direction: Direction,
    channel: Option<Box<dyn AudioChannel>>,
}

impl ChannelSlot {
    pub fn empty(direction: Direction) -> Self {
        Self {
            direction,
            channel: None,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Opens and resumes a fresh channel, replacing any previous one. On failure the slot is
    /// left empty.
    pub fn open(
        &mut self,
        backend: &mut dyn AudioBackend,
        format: PcmFormat,
    ) -> Result<(), ChannelError> {
        self.close();
        let mut channel = backend.open(self.direction, format)?;
        channel.resume()?;
        self.channel = Some(channel);
        Ok(())
    }

    /// Applies `format` in place. A no-op on an empty slot.
    pub fn set_format(&mut self, format: PcmFormat) -> Result<(), ChannelError> {
        match self.channel.as_mut() {
            Some(ch) => ch.set_format(format),
            None => Ok(()),
        }
    }

    pub fn format(&self) -> Option<PcmFormat> {
        self.channel.as_ref().map(|ch| ch.format())
    }

    pub fn clear(&mut self) -> Result<(), ChannelError> {
        match self.channel.as_mut() {
            Some(ch) => ch.clear(),
            None => Ok(()),
        }
    }

    pub fn close(&mut self) {
        self.channel = None;
    }

    pub fn channel_mut(&mut self) -> Option<&mut (dyn AudioChannel + 'static)> {
        self.channel.as_deref_mut()
    }
}

impl core::fmt::Debug for ChannelSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelSlot")
            .field("direction", &self.direction)
            .field("format", &self.format())
            .finish()
    }
}
