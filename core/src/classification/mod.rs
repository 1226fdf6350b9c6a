//! Classification metadata catalog: classifiers, facets, blocks, signatures.
//!
//! Built once by the caller and threaded through the pipeline as a plain
//! value, rather than reached via a process-wide singleton — pipeline
//! construction takes an explicit reference instead of relying on
//! once-only global initialization.

pub mod name_id;
pub mod tag;
mod xml;

use crate::config::Config;
use crate::crypt;
use crate::error::ClassificationError;
use name_id::NameIdMapper;
use tag::TagContainer;
use xml::XmlNode;

use std::fs;
use std::path::Path;

/// Signature/classifier ids at or above this value are reserved for
/// top-level classifiers; ids below it belong to a block's own signatures.
pub const MIN_CLASSIFIER_SIG_ID: u32 = 1000;

/// A labelled, top-level classification verdict.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierDescriptor {
    pub sig_id: u32,
    pub standalone: bool,
    pub is_final: bool,
}

/// One pattern within a block: an opaque XML fragment plus optional tag overlay.
#[derive(Debug, Clone)]
pub struct Signature {
    pub sig_id: u32,
    pub standalone: bool,
    pub is_final: bool,
    /// The signature's single element child, reconstructed as XML and left
    /// opaque for an external rule/pattern evaluator.
    pub pattern_xml: String,
    /// Only non-empty when `standalone`.
    pub tags: TagContainer,
}

/// A named group of signatures and rules contributing to one facet of classification.
#[derive(Debug, Clone)]
pub struct ClassificationBlock {
    pub block_id: u32,
    pub tag_template: TagContainer,
    pub precondition: Option<String>,
    pub signatures: Vec<Signature>,
    /// Opaque `<rule>` fragments, passed through to an external rule evaluator.
    pub rules: Vec<String>,
}

/// The loaded, validated classification catalog.
#[derive(Debug, Default)]
pub struct ClassificationMetadata {
    block_id_mapper: NameIdMapper,
    facet_id_mapper: NameIdMapper,
    focus_id_mapper: NameIdMapper,
    classifiers: std::collections::HashMap<String, ClassifierDescriptor>,
    final_mask: u64,
    blocks: Vec<Option<ClassificationBlock>>,
}

impl ClassificationMetadata {
    fn empty() -> Self {
        ClassificationMetadata::default()
    }

    pub fn final_mask(&self) -> u64 {
        self.final_mask
    }

    pub fn num_facets(&self) -> usize {
        self.facet_id_mapper.len()
    }

    pub fn facet_id(&self, name: &str) -> Option<u32> {
        self.facet_id_mapper.get_id(name)
    }

    pub fn classifier(&self, name: &str) -> Option<&ClassifierDescriptor> {
        self.classifiers.get(name)
    }

    pub fn block(&self, block_id: u32) -> Option<&ClassificationBlock> {
        self.blocks.get(block_id as usize).and_then(|b| b.as_ref())
    }

    pub fn block_id(&self, name: &str) -> Option<u32> {
        self.block_id_mapper.get_id(name)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &ClassificationBlock> {
        self.blocks.iter().filter_map(|b| b.as_ref())
    }

    /// Loads the catalog named by `config.classification.file_name`, if set.
    ///
    /// Returns `Ok(None)` when no catalog is configured (classification is
    /// simply disabled — not fatal). Any schema or range violation is
    /// returned as `Err`, which callers should treat as fatal at load time.
    pub fn load_from_config(config: &Config) -> Result<Option<Self>, ClassificationError> {
        let Some(file_name) = config.classification.file_name.as_ref() else {
            log::warn!("classification.fileName not set, unable to perform traffic classification");
            return Ok(None);
        };

        log::info!("loading classification config from {file_name}");

        let path = Path::new(file_name);
        let xml = if config.security_manager.encrypted_classification {
            log::debug!("classification rules encrypted; will check password");
            let ciphertext = fs::read(path).map_err(|source| ClassificationError::Io {
                path: file_name.clone(),
                source,
            })?;
            let key = crypt::prompt_key().map_err(|source| ClassificationError::Io {
                path: file_name.clone(),
                source,
            })?;
            let plaintext = crypt::xor_with_keystream(&ciphertext, &key);
            String::from_utf8_lossy(&plaintext).into_owned()
        } else {
            log::debug!("classification rules unencrypted; will read from file");
            fs::read_to_string(path).map_err(|source| ClassificationError::Io {
                path: file_name.clone(),
                source,
            })?
        };

        Self::load_from_str(&xml).map(Some)
    }

    /// Parses and validates a catalog document already in memory.
    pub fn load_from_str(xml: &str) -> Result<Self, ClassificationError> {
        let root = xml::parse_document(xml)?;
        let mut meta = ClassificationMetadata::empty();

        if let Some(global) = root.children_named("global").next() {
            meta.read_global(global)?;
        }
        for block in root.children_named("block") {
            meta.read_block(block)?;
        }
        Ok(meta)
    }

    fn read_global(&mut self, global: &XmlNode) -> Result<(), ClassificationError> {
        let mut previous_sig_id = 0u32;
        for classifier in global.children_named("classifier") {
            let name = classifier.attr("name").unwrap_or_default().to_string();
            let sig_id: u32 = classifier
                .attr("sigId")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);

            if sig_id < MIN_CLASSIFIER_SIG_ID {
                return Err(ClassificationError::ClassifierSigIdTooLow {
                    name,
                    sig_id,
                    min: MIN_CLASSIFIER_SIG_ID,
                });
            }
            if sig_id <= previous_sig_id {
                return Err(ClassificationError::ClassifierSigIdNotIncreasing {
                    name,
                    sig_id,
                    previous: previous_sig_id,
                });
            }
            previous_sig_id = sig_id;

            let is_final = classifier.attr_bool("final");
            let standalone = classifier.attr_bool("standalone") || is_final;

            self.classifiers.insert(
                name,
                ClassifierDescriptor {
                    sig_id,
                    standalone,
                    is_final,
                },
            );
        }

        for facet in global.children_named("facet") {
            let required = facet.attr_bool("required");
            let name = facet.attr("name").unwrap_or_default();
            let facet_id = self.facet_id_mapper.register_name(name);
            if required {
                self.final_mask |= 1u64 << facet_id;
            }
        }

        Ok(())
    }

    fn read_tags(&mut self, container: &XmlNode) -> Result<TagContainer, ClassificationError> {
        let mut tags = TagContainer::new(self.facet_id_mapper.len());
        for tag in container.children_named("tag") {
            let name = tag.attr("name").unwrap_or_default();
            let value = tag.attr("value").unwrap_or_default();
            let facet_id = self
                .facet_id_mapper
                .get_id(name)
                .ok_or_else(|| ClassificationError::UndefinedFacet(name.to_string()))?;
            let focus_id = self.focus_id_mapper.register_name(value);
            tags.set_tag(facet_id, focus_id, 0);
        }
        Ok(tags)
    }

    fn read_block(&mut self, block: &XmlNode) -> Result<(), ClassificationError> {
        let block_name = block.attr("name").unwrap_or_default();
        let block_id = self.block_id_mapper.register_name(block_name);

        let tag_template = self.read_tags(block)?;
        let precondition = block
            .children_named("precondition")
            .next()
            .map(xml::serialize_node);

        if self.blocks.len() <= block_id as usize {
            self.blocks.resize(block_id as usize + 1, None);
        }
        self.blocks[block_id as usize] = Some(ClassificationBlock {
            block_id,
            tag_template,
            precondition,
            signatures: Vec::new(),
            rules: Vec::new(),
        });

        let mut previous_sig_id = 0u32;
        for sig_container in block.children_named("signature") {
            let sig_id: u32 = sig_container
                .attr("id")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);

            if sig_id >= MIN_CLASSIFIER_SIG_ID {
                return Err(ClassificationError::SignatureSigIdTooHigh {
                    block: block_name.to_string(),
                    sig_id,
                    min: MIN_CLASSIFIER_SIG_ID,
                });
            }
            if sig_id <= previous_sig_id {
                return Err(ClassificationError::SignatureSigIdNotIncreasing {
                    block: block_name.to_string(),
                    sig_id,
                    previous: previous_sig_id,
                });
            }
            previous_sig_id = sig_id;

            let is_final = sig_container.attr_bool("final");
            let standalone = sig_container.attr_bool("standalone") || is_final;
            let tags = self.read_tags(sig_container)?;

            if !tags.is_empty() && !standalone {
                return Err(ClassificationError::TagsOnNonStandaloneSignature {
                    block: block_name.to_string(),
                    sig_id,
                });
            }

            let element = sig_container
                .children
                .iter()
                .find(|c| c.name != "tag")
                .ok_or_else(|| ClassificationError::EmptySignatureContainer {
                    block: block_name.to_string(),
                    sig_id,
                })?;

            let signature = Signature {
                sig_id,
                standalone,
                is_final,
                pattern_xml: xml::serialize_node(element),
                tags,
            };

            self.blocks[block_id as usize]
                .as_mut()
                .expect("just inserted")
                .signatures
                .push(signature);
        }

        for rule in block.children_named("rule") {
            self.blocks[block_id as usize]
                .as_mut()
                .expect("just inserted")
                .rules
                .push(xml::serialize_node(rule));
        }

        Ok(())
    }
}
