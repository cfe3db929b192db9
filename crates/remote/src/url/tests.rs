use super::{Error, RemoteUrl, TokenSelector};

#[test]
fn bare_url_selects_the_default_login() {
    let url: RemoteUrl = "dropbox:///foo/bar".parse().unwrap();
    assert_eq!(url.selector(), &TokenSelector::Default);
    assert_eq!(url.root(), "/foo/bar");
}

#[test]
fn named_login() {
    let url: RemoteUrl = "dropbox://work@/foo".parse().unwrap();
    assert_eq!(url.selector(), &TokenSelector::Named("work".into()));
    assert_eq!(url.root(), "/foo");
}

#[test]
fn inline_token() {
    let url: RemoteUrl = "dropbox://:SECRET@/foo".parse().unwrap();
    assert_eq!(url.selector(), &TokenSelector::Inline("SECRET".into()));
    assert_eq!(url.root(), "/foo");
}

#[test]
fn inline_token_wins_over_a_name() {
    let url: RemoteUrl = "dropbox://work:SECRET@/foo".parse().unwrap();
    assert_eq!(url.selector(), &TokenSelector::Inline("SECRET".into()));
}

#[test]
fn empty_userinfo_is_the_default_login() {
    let url: RemoteUrl = "dropbox://@/foo".parse().unwrap();
    assert_eq!(url.selector(), &TokenSelector::Default);
}

#[test]
fn path_is_normalized() {
    let url: RemoteUrl = "dropbox:///foo//bar/".parse().unwrap();
    assert_eq!(url.root(), "/foo/bar");

    let root: RemoteUrl = "dropbox:///".parse().unwrap();
    assert_eq!(root.root(), "");
}

#[test]
fn at_sign_in_the_path_is_not_userinfo() {
    let url: RemoteUrl = "dropbox:///f@o/bar".parse().unwrap();
    assert_eq!(url.selector(), &TokenSelector::Default);
    assert_eq!(url.root(), "/f@o/bar");
}

#[test]
fn wrong_scheme_is_rejected() {
    let err = "https://example.com/foo".parse::<RemoteUrl>().unwrap_err();
    assert!(matches!(err, Error::Scheme(_)));
}

#[test]
fn relative_path_is_rejected() {
    let err = "dropbox://work@foo/bar".parse::<RemoteUrl>().unwrap_err();
    assert!(matches!(err, Error::RelativePath(_)));
}

#[test]
fn dotted_segments_are_rejected() {
    let err = "dropbox:///foo/../bar".parse::<RemoteUrl>().unwrap_err();
    assert!(matches!(err, Error::DottedPath(..)));
}

#[test]
fn display_never_echoes_the_token() {
    let url: RemoteUrl = "dropbox://:SECRET@/foo".parse().unwrap();
    assert!(!url.to_string().contains("SECRET"));
}
