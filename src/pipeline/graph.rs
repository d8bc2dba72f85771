//! Graph instantiation.
//!
//! Hands launch descriptions to GStreamer's parser and wraps the result in
//! a pipeline. Elements are looked up by name; properties are read and
//! written through their text form.

use crate::error::{FrameportError, Result};
use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

/// A built pipeline graph
pub struct Graph {
    pipeline: gst::Pipeline,
}

impl Graph {
    /// Parse and instantiate a launch description.
    ///
    /// A description that yields a single element is placed into a fresh
    /// pipeline.
    pub fn launch(description: &str) -> Result<Self> {
        super::init()?;
        let element = gst::parse::launch_full(description, None, gst::ParseFlags::FATAL_ERRORS)
            .map_err(|e| FrameportError::Graph(e.to_string()))?;
        let pipeline = match element.downcast::<gst::Pipeline>() {
            Ok(pipeline) => pipeline,
            Err(element) => {
                let pipeline = gst::Pipeline::new();
                pipeline
                    .add(&element)
                    .map_err(|e| FrameportError::Graph(e.to_string()))?;
                pipeline
            }
        };
        Ok(Self { pipeline })
    }

    pub fn pipeline(&self) -> &gst::Pipeline {
        &self.pipeline
    }

    pub fn element(&self, name: &str) -> Result<gst::Element> {
        self.pipeline
            .by_name(name)
            .ok_or_else(|| FrameportError::ElementNotFound(name.to_string()))
    }

    /// Every element in the graph, bins included, sorted by name.
    pub fn element_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pipeline
            .iterate_recurse()
            .into_iter()
            .filter_map(|element| element.ok())
            .map(|element| element.name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn app_sink(&self, name: &str) -> Result<gst_app::AppSink> {
        self.element(name)?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| FrameportError::NotAnAppSink(name.to_string()))
    }

    pub fn app_sinks(&self) -> Vec<gst_app::AppSink> {
        self.pipeline
            .iterate_recurse()
            .into_iter()
            .filter_map(|element| element.ok())
            .filter_map(|element| element.downcast::<gst_app::AppSink>().ok())
            .collect()
    }

    /// Resolve the configured frame sink. Without a configured name the
    /// first appsink to receive raw video claims the slot at runtime.
    pub fn frame_sink(&self, configured: Option<&str>) -> Result<Option<String>> {
        let Some(name) = configured else {
            return Ok(None);
        };
        self.app_sink(name).map_err(|e| {
            FrameportError::Graph(format!("frame sink \"{}\" is unusable: {}", name, e))
        })?;
        Ok(Some(name.to_string()))
    }

    pub fn pad(&self, element: &str, pad: &str) -> Result<gst::Pad> {
        let el = self.element(element)?;
        el.static_pad(pad)
            .or_else(|| el.pads().into_iter().find(|p| p.name() == pad))
            .ok_or_else(|| FrameportError::PadNotFound {
                element: element.to_string(),
                pad: pad.to_string(),
            })
    }

    fn param_spec(&self, element: &gst::Element, name: &str, property: &str) -> Result<glib::ParamSpec> {
        element.find_property(property).ok_or_else(|| {
            FrameportError::Property(format!("no property \"{}\" in element \"{}\"", property, name))
        })
    }

    /// Set a property from its text form, as written in a launch line.
    pub fn set_property(&self, element: &str, property: &str, value: &str) -> Result<()> {
        let el = self.element(element)?;
        let pspec = self.param_spec(&el, element, property)?;
        let flags = pspec.flags();
        if !flags.contains(glib::ParamFlags::WRITABLE) || flags.contains(glib::ParamFlags::CONSTRUCT_ONLY) {
            return Err(FrameportError::Property(format!(
                "{}.{} is not writable",
                element, property
            )));
        }
        let parsed = glib::Value::deserialize(value, pspec.value_type()).map_err(|_| {
            FrameportError::Property(format!(
                "invalid value \"{}\" for {}.{} ({})",
                value,
                element,
                property,
                pspec.value_type().name()
            ))
        })?;
        el.set_property_from_value(property, &parsed);
        Ok(())
    }

    /// Read a property in its text form.
    pub fn property(&self, element: &str, property: &str) -> Result<String> {
        let el = self.element(element)?;
        let pspec = self.param_spec(&el, element, property)?;
        if !pspec.flags().contains(glib::ParamFlags::READABLE) {
            return Err(FrameportError::Property(format!(
                "{}.{} is not readable",
                element, property
            )));
        }
        el.property_value(property)
            .serialize()
            .map(|text| text.to_string())
            .map_err(|_| {
                FrameportError::Property(format!("{}.{} has no text form", element, property))
            })
    }
}
