/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use crate::address::ResourceAddress;

/// Processor option bits shared across the workspace; the template
/// processor interprets them.
pub mod options {
    pub const REWRITE_URL: u32 = 1 << 0;
    pub const FOCUS_WIDGET: u32 = 1 << 1;
    pub const SELF_CONTAINER: u32 = 1 << 2;
    pub const PREFIX_CSS_CLASS: u32 = 1 << 3;
    pub const PREFIX_XML_ID: u32 = 1 << 4;
    pub const STYLE: u32 = 1 << 5;
    pub const CONTAINER: u32 = 1 << 6;
}

/// How a widget response is transformed before it reaches the
/// containing document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transformation {
    /// Run the response through the XML/HTML processor.
    Process { options: u32 },
    /// Run the response through the CSS processor.
    ProcessCss { options: u32 },
    /// Run the response through the text processor only.
    ProcessText,
}

/// A named variant of a widget's response-processing configuration.
#[derive(Debug, Clone)]
pub struct WidgetView {
    /// None denotes the unnamed default view.
    pub name: Option<String>,
    pub address: ResourceAddress,
    pub transformations: Vec<Transformation>,
}

impl WidgetView {
    pub fn new(name: Option<&str>, address: ResourceAddress) -> WidgetView {
        WidgetView {
            name: name.map(str::to_string),
            address,
            transformations: Vec::new(),
        }
    }

    /// Does this view run the HTML processor at all?
    pub fn has_processor(&self) -> bool {
        self.transformations
            .iter()
            .any(|t| matches!(t, Transformation::Process { .. }))
    }

    /// Is the processed response itself a widget container?
    pub fn is_container(&self) -> bool {
        self.transformations.iter().any(
            |t| matches!(t, Transformation::Process { options: o } if o & options::CONTAINER != 0),
        )
    }
}
