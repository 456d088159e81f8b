/// Adapters registered under the short name callers use (`openai`, `bing`, ...).
#[derive(Debug, Clone)]
pub struct ProviderRegistry<T: NamedProvider> {
    providers: Vec<T>,
}

pub trait NamedProvider {
    fn name(&self) -> &str;
}

impl<T: NamedProvider + ?Sized> NamedProvider for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: NamedProvider> Default for ProviderRegistry<T> {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
        }
    }
}

impl<T: NamedProvider> ProviderRegistry<T> {
    pub fn new(providers: Vec<T>) -> Self {
        Self { providers }
    }

    /// Later registrations under an existing name replace the earlier one.
    pub fn register(&mut self, provider: T) {
        self.providers
            .retain(|existing| !existing.name().eq_ignore_ascii_case(provider.name()));
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        let wanted = name.trim();
        self.providers
            .iter()
            .find(|provider| provider.name().eq_ignore_ascii_case(wanted))
    }

    pub fn list(&self) -> Vec<String> {
        let mut names = self
            .providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect::<Vec<String>>();
        names.sort();
        names
    }

    pub fn providers(&self) -> &[T] {
        self.providers.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::{NamedProvider, ProviderRegistry};

    #[derive(Clone, Debug)]
    struct DummyProvider {
        name: String,
        tag: u8,
    }

    impl NamedProvider for DummyProvider {
        fn name(&self) -> &str {
            self.name.as_str()
        }
    }

    fn dummy(name: &str, tag: u8) -> DummyProvider {
        DummyProvider {
            name: name.to_string(),
            tag,
        }
    }

    #[test]
    fn list_is_sorted_but_registration_order_is_kept() {
        let registry = ProviderRegistry::new(vec![dummy("z", 0), dummy("a", 0), dummy("m", 0)]);
        assert_eq!(registry.list(), vec!["a", "m", "z"]);
        assert_eq!(
            registry
                .providers()
                .iter()
                .map(|provider| provider.name().to_string())
                .collect::<Vec<String>>(),
            vec!["z", "a", "m"]
        );
    }

    #[test]
    fn lookup_ignores_case_and_whitespace() {
        let registry = ProviderRegistry::new(vec![dummy("openai", 1)]);
        assert_eq!(registry.get(" OpenAI ").map(|p| p.tag), Some(1));
        assert!(registry.get("anthropic").is_none());
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = ProviderRegistry::default();
        registry.register(dummy("bing", 1));
        registry.register(dummy("BING", 2));
        assert_eq!(registry.providers().len(), 1);
        assert_eq!(registry.get("bing").map(|p| p.tag), Some(2));
    }

    #[test]
    fn boxed_trait_objects_are_named() {
        let boxed: Box<dyn NamedProvider> = Box::new(dummy("google", 0));
        let registry = ProviderRegistry::new(vec![boxed]);
        assert!(registry.get("google").is_some());
    }
}
