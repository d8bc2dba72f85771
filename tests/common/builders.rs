//! Test data builders for creating launch descriptions

/// Builder for a single video chain ending in a named appsink
pub struct VideoChainBuilder {
    width: u32,
    height: u32,
    format: String,
    num_buffers: Option<i64>,
    pattern: Option<String>,
    filter_name: Option<String>,
    sink_name: String,
    sync: bool,
}

impl VideoChainBuilder {
    pub fn new(sink_name: &str) -> Self {
        Self {
            width: 320,
            height: 240,
            format: "I420".to_string(),
            num_buffers: None,
            pattern: None,
            filter_name: None,
            sink_name: sink_name.to_string(),
            sync: false,
        }
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn format(mut self, format: &str) -> Self {
        self.format = format.to_string();
        self
    }

    pub fn num_buffers(mut self, n: i64) -> Self {
        self.num_buffers = Some(n);
        self
    }

    /// A videotestsrc pattern nick, such as "snow" or "white".
    pub fn pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    /// Put the caps into a named capsfilter instead of an anonymous one.
    pub fn filter_name(mut self, name: &str) -> Self {
        self.filter_name = Some(name.to_string());
        self
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn caps(&self) -> String {
        format!(
            "video/x-raw,format={},width={},height={}",
            self.format, self.width, self.height
        )
    }

    pub fn build(self) -> String {
        let mut source = "videotestsrc".to_string();
        if let Some(n) = self.num_buffers {
            source.push_str(&format!(" num-buffers={}", n));
        }
        if let Some(pattern) = &self.pattern {
            source.push_str(&format!(" pattern={}", pattern));
        }
        let filter = match &self.filter_name {
            Some(name) => format!("capsfilter name={} caps=\"{}\"", name, self.caps()),
            None => self.caps(),
        };
        format!(
            "{} ! {} ! appsink name={} sync={}",
            source, filter, self.sink_name, self.sync
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_chain_builder() {
        let description = VideoChainBuilder::new("sink")
            .size(640, 480)
            .num_buffers(3)
            .build();
        assert_eq!(
            description,
            "videotestsrc num-buffers=3 ! video/x-raw,format=I420,width=640,height=480 ! appsink name=sink sync=false"
        );
        let description = VideoChainBuilder::new("sink").pattern("white").build();
        assert!(description.starts_with("videotestsrc pattern=white ! "));
    }
}
