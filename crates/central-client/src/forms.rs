//! Form definition uploads

use bytes::Bytes;
use transport::header::{HeaderName, HeaderValue};

use crate::error::{Error, Result};
use crate::executor::RequestOptions;

const FORM_ID_FALLBACK: &str = "x-xlsform-formid-fallback";

/// Source format of an uploaded form definition, from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormSource {
    Xml,
    Xls,
    Xlsx,
}

impl FormSource {
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "xml" => Ok(FormSource::Xml),
            "xls" => Ok(FormSource::Xls),
            "xlsx" => Ok(FormSource::Xlsx),
            _ => Err(Error::InvalidRequest(format!(
                "unsupported form file {file_name:?}: expected .xml, .xls or .xlsx"
            ))),
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            FormSource::Xml => "application/xml",
            FormSource::Xls => "application/vnd.ms-excel",
            FormSource::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }

    pub fn is_xlsform(self) -> bool {
        !matches!(self, FormSource::Xml)
    }
}

/// A form definition file plus upload flags.
#[derive(Debug, Clone)]
pub struct FormUpload {
    pub file_name: String,
    pub content: Bytes,
    /// Form id Central uses when an XLSForm does not declare one
    pub form_id_fallback: Option<String>,
    pub ignore_warnings: bool,
    pub publish: bool,
}

impl FormUpload {
    pub fn new(file_name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
            form_id_fallback: None,
            ignore_warnings: false,
            publish: false,
        }
    }

    /// Validate the upload and build the request options for
    /// `POST projects/{id}/forms`.
    pub(crate) fn request_options(&self) -> Result<RequestOptions> {
        self.options(true)
    }

    /// Same as [`request_options`](Self::request_options) for
    /// `POST .../draft`, which has no `publish` flag.
    pub(crate) fn draft_request_options(&self) -> Result<RequestOptions> {
        self.options(false)
    }

    fn options(&self, with_publish: bool) -> Result<RequestOptions> {
        let source = FormSource::from_file_name(&self.file_name)?;
        if self.content.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "form file {:?} is empty",
                self.file_name
            )));
        }

        let mut options =
            RequestOptions::default().query("ignoreWarnings", self.ignore_warnings.to_string());
        if with_publish {
            options = options.query("publish", self.publish.to_string());
        }
        options = options.raw(
            self.content.clone(),
            HeaderValue::from_static(source.content_type()),
        );

        let fallback = self
            .form_id_fallback
            .as_deref()
            .filter(|_| source.is_xlsform());
        if let Some(form_id) = fallback {
            let value = HeaderValue::from_str(form_id).map_err(|_| {
                Error::InvalidRequest(format!("invalid form id fallback {form_id:?}"))
            })?;
            options = options.header(HeaderName::from_static(FORM_ID_FALLBACK), value);
        }
        Ok(options)
    }
}
