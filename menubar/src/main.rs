fn main() {
    murmur_menubar::run();
}
