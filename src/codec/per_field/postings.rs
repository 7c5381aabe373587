use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashMap;

use crate::codec::per_field::{
    PER_FIELD_POSTINGS_FORMAT_KEY, PER_FIELD_POSTINGS_SUFFIX_KEY, PostingsFormatPolicy,
    SuffixAssigner, instance_key, record_format, recorded_format, suffix_name,
};
use crate::codec::postings::{FieldsConsumer, FieldsProducer, PostingList, PostingsFormat, Terms};
use crate::codec::registry::FormatRegistry;
use crate::error::{PilumError, Result};
use crate::index::field_info::FieldInfo;
use crate::index::state::{SegmentReadState, SegmentWriteState};

/// Name of the per-field postings dispatcher.
pub const PER_FIELD_POSTINGS_FORMAT_NAME: &str = "PerFieldPostings";

/// Routes every field to the postings format chosen by a policy.
#[derive(Debug, Clone)]
pub struct PerFieldPostingsFormat {
    policy: Arc<dyn PostingsFormatPolicy>,
}

impl PerFieldPostingsFormat {
    pub fn new(policy: Arc<dyn PostingsFormatPolicy>) -> Self {
        PerFieldPostingsFormat { policy }
    }

    pub fn policy(&self) -> &Arc<dyn PostingsFormatPolicy> {
        &self.policy
    }
}

impl PostingsFormat for PerFieldPostingsFormat {
    fn name(&self) -> &str {
        PER_FIELD_POSTINGS_FORMAT_NAME
    }

    fn fields_consumer(&self, state: &SegmentWriteState) -> Result<Box<dyn FieldsConsumer>> {
        Ok(Box::new(PerFieldPostingsConsumer::new(
            state.clone(),
            Arc::clone(&self.policy),
        )))
    }

    fn fields_producer(&self, state: &SegmentReadState) -> Result<Box<dyn FieldsProducer>> {
        Ok(Box::new(PerFieldPostingsProducer::open(state)?))
    }
}

#[derive(Debug)]
struct Group {
    format: Arc<dyn PostingsFormat>,
    number: u32,
    suffix: String,
    consumer: Box<dyn FieldsConsumer>,
}

/// Writes each field through the consumer of its postings format instance.
#[derive(Debug)]
pub struct PerFieldPostingsConsumer {
    state: SegmentWriteState,
    policy: Arc<dyn PostingsFormatPolicy>,
    groups: Vec<Group>,
    by_instance: AHashMap<usize, usize>,
    suffixes: SuffixAssigner,
    finished: bool,
}

impl PerFieldPostingsConsumer {
    pub fn new(state: SegmentWriteState, policy: Arc<dyn PostingsFormatPolicy>) -> Self {
        PerFieldPostingsConsumer {
            state,
            policy,
            groups: Vec::new(),
            by_instance: AHashMap::new(),
            suffixes: SuffixAssigner::default(),
            finished: false,
        }
    }

    /// Suffixes of the groups opened so far.
    pub fn suffixes(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.suffix.clone()).collect()
    }

    fn group_for(&mut self, field: &FieldInfo) -> Result<usize> {
        if self.finished {
            return Err(PilumError::invalid_operation(
                "per-field postings consumer is closed",
            ));
        }
        let format = self.policy.format_for_field(&field.name);
        let key = instance_key(&format);
        let index = match self.by_instance.get(&key) {
            Some(&index) => index,
            None => {
                let number = self.suffixes.next_suffix(format.name());
                let suffix = suffix_name(format.name(), number);
                let consumer = format.fields_consumer(&self.state.with_suffix(&suffix))?;
                log::debug!(
                    "Segment {}: postings group {suffix}",
                    self.state.segment_name
                );
                self.groups.push(Group {
                    format,
                    number,
                    suffix,
                    consumer,
                });
                self.by_instance.insert(key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };

        let group = &self.groups[index];
        record_format(
            field,
            PER_FIELD_POSTINGS_FORMAT_KEY,
            PER_FIELD_POSTINGS_SUFFIX_KEY,
            group.format.name(),
            group.number,
        )?;
        Ok(index)
    }
}

impl FieldsConsumer for PerFieldPostingsConsumer {
    fn write_field(&mut self, field: &FieldInfo, terms: &[(Vec<u8>, PostingList)]) -> Result<()> {
        let written = self
            .group_for(field)
            .and_then(|index| self.groups[index].consumer.write_field(field, terms));
        if written.is_err() {
            self.abort();
        }
        written
    }

    fn close(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let mut first_error = None;
        for group in &mut self.groups {
            if let Err(e) = group.consumer.close() {
                log::warn!("Failed to close postings group {}: {e}", group.suffix);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => {
                self.abort();
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn abort(&mut self) {
        self.finished = true;
        for group in &mut self.groups {
            group.consumer.abort();
        }
    }
}

/// Reads each field through the producer of the postings format that wrote it.
#[derive(Debug)]
pub struct PerFieldPostingsProducer {
    producers: Vec<(String, Box<dyn FieldsProducer>)>,
    fields: AHashMap<u32, usize>,
    closed: AtomicBool,
}

impl PerFieldPostingsProducer {
    pub fn open(state: &SegmentReadState) -> Result<Self> {
        let mut producer = PerFieldPostingsProducer {
            producers: Vec::new(),
            fields: AHashMap::new(),
            closed: AtomicBool::new(false),
        };
        let mut by_suffix: AHashMap<String, usize> = AHashMap::new();

        for field in state.field_infos.iter().filter(|f| f.has_postings) {
            let opened = (|| -> Result<Option<usize>> {
                let Some((format_name, number)) = recorded_format(
                    field,
                    PER_FIELD_POSTINGS_FORMAT_KEY,
                    PER_FIELD_POSTINGS_SUFFIX_KEY,
                )?
                else {
                    return Ok(None);
                };
                let suffix = suffix_name(&format_name, number);
                if let Some(&index) = by_suffix.get(&suffix) {
                    return Ok(Some(index));
                }
                let format = FormatRegistry::global()
                    .read()
                    .postings_format(&format_name)
                    .ok_or_else(|| {
                        PilumError::corruption(format!(
                            "field {:?} uses unknown postings format {format_name}",
                            field.name
                        ))
                    })?;
                let opened = format.fields_producer(&state.with_suffix(&suffix))?;
                producer.producers.push((suffix.clone(), opened));
                by_suffix.insert(suffix, producer.producers.len() - 1);
                Ok(Some(producer.producers.len() - 1))
            })();

            match opened {
                Ok(Some(index)) => {
                    producer.fields.insert(field.number, index);
                }
                Ok(None) => {}
                Err(e) => {
                    if let Err(close_error) = producer.close() {
                        log::warn!("Failed to close postings after open error: {close_error}");
                    }
                    return Err(e);
                }
            }
        }

        log::debug!(
            "Opened per-field postings of {}: {} producers",
            state.segment_name,
            producer.producers.len()
        );
        Ok(producer)
    }

    /// Suffixes of the opened producers.
    pub fn suffixes(&self) -> Vec<String> {
        self.producers.iter().map(|(s, _)| s.clone()).collect()
    }
}

impl FieldsProducer for PerFieldPostingsProducer {
    fn terms(&self, field: &FieldInfo) -> Result<Option<Arc<dyn Terms>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PilumError::invalid_operation("postings are closed"));
        }
        match self.fields.get(&field.number) {
            Some(&index) => self.producers[index].1.terms(field),
            None => Ok(None),
        }
    }

    fn check_integrity(&self) -> Result<()> {
        for (_, producer) in &self.producers {
            producer.check_integrity()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_error = None;
        for (suffix, producer) in &self.producers {
            if let Err(e) = producer.close() {
                log::warn!("Failed to close postings {suffix}: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
